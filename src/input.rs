// Keyboard control surface: fixed bindings dispatched by the render thread
// before each capture.
use crate::config::{EffectConfig, SharedEffectConfig, StepSizes};
use crate::log_info;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Escape,
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    P,
    /// The overlay window was closed by the window manager.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Scanlines,
    Curvature,
    ChromaticAberration,
    Vignette,
}

impl Parameter {
    fn step(self, steps: &StepSizes) -> f32 {
        match self {
            Parameter::Scanlines => steps.scanlines,
            Parameter::Curvature => steps.curvature,
            Parameter::ChromaticAberration => steps.chromatic_aberration,
            Parameter::Vignette => steps.vignette,
        }
    }

    fn field(self, config: &mut EffectConfig) -> &mut f32 {
        match self {
            Parameter::Scanlines => &mut config.scanline_intensity,
            Parameter::Curvature => &mut config.curvature,
            Parameter::ChromaticAberration => &mut config.chromatic_aberration,
            Parameter::Vignette => &mut config.vignette_intensity,
        }
    }

    fn value(self, config: &EffectConfig) -> f32 {
        match self {
            Parameter::Scanlines => config.scanline_intensity,
            Parameter::Curvature => config.curvature,
            Parameter::ChromaticAberration => config.chromatic_aberration,
            Parameter::Vignette => config.vignette_intensity,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Parameter::Scanlines => "Scanlines",
            Parameter::Curvature => "Curvature",
            Parameter::ChromaticAberration => "Chromatic aberration",
            Parameter::Vignette => "Vignette",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Exit,
    ToggleControls,
    Decrease(Parameter),
    Increase(Parameter),
    TogglePerformanceMode,
}

pub fn command_for(key: Key) -> KeyCommand {
    match key {
        Key::Escape | Key::Close => KeyCommand::Exit,
        Key::Digit0 => KeyCommand::ToggleControls,
        Key::Digit1 => KeyCommand::Decrease(Parameter::Scanlines),
        Key::Digit2 => KeyCommand::Increase(Parameter::Scanlines),
        Key::Digit3 => KeyCommand::Decrease(Parameter::Curvature),
        Key::Digit4 => KeyCommand::Increase(Parameter::Curvature),
        Key::Digit5 => KeyCommand::Decrease(Parameter::ChromaticAberration),
        Key::Digit6 => KeyCommand::Increase(Parameter::ChromaticAberration),
        Key::Digit7 => KeyCommand::Decrease(Parameter::Vignette),
        Key::Digit8 => KeyCommand::Increase(Parameter::Vignette),
        Key::P => KeyCommand::TogglePerformanceMode,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Exit,
}

/// Applies one command. Parameter changes go through the clamping write
/// boundary of [`SharedEffectConfig::update`].
pub fn apply_command(
    command: KeyCommand,
    config: &SharedEffectConfig,
    steps: &StepSizes,
    controls_visible: &AtomicBool,
) -> Dispatch {
    match command {
        KeyCommand::Exit => {
            log_info!("Exit requested from keyboard");
            return Dispatch::Exit;
        }
        KeyCommand::ToggleControls => {
            let visible = !controls_visible.fetch_xor(true, Ordering::SeqCst);
            log_info!("Controls {}", if visible { "shown" } else { "hidden" });
        }
        KeyCommand::Decrease(param) | KeyCommand::Increase(param) => {
            let delta = match command {
                KeyCommand::Decrease(_) => -param.step(steps),
                _ => param.step(steps),
            };
            config.update(|c| *param.field(c) += delta);
            log_info!("{}: {:.2}", param.label(), config.read(|c| param.value(c)));
        }
        KeyCommand::TogglePerformanceMode => {
            config.update(|c| c.performance_mode = !c.performance_mode);
            let enabled = config.read(|c| c.performance_mode);
            log_info!("Performance mode: {}", if enabled { "ON" } else { "OFF" });
        }
    }
    Dispatch::Continue
}
