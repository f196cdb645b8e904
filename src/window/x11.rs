// X11 side of the portable overlay: dock type, above/sticky state, an empty
// input region, and unmap-based hiding on the window minifb created.
use crate::error::{CrtError, Result};
use crate::log_warn;
use crate::monitor::MonitorGeometry;
use std::fmt::Display;
use x11rb::connection::Connection;
use x11rb::protocol::shape::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ClientMessageEvent, ClipOrdering, ConfigureWindowAux, ConnectionExt as _, EventMask,
    MapState, PropMode, StackMode, Window,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

const NET_WM_STATE_ADD: u32 = 1;

fn x11_error(context: &str, e: impl Display) -> CrtError {
    CrtError::Window(format!("{}: {}", context, e))
}

struct Atoms {
    wm_window_type: Atom,
    wm_window_type_dock: Atom,
    wm_state: Atom,
    wm_state_above: Atom,
    wm_state_sticky: Atom,
}

/// Second connection to the X server, driving the minifb window by id.
pub struct X11Shell {
    conn: RustConnection,
    root: Window,
    window: Window,
    atoms: Atoms,
}

impl X11Shell {
    /// Fails when there is no X display or `raw` is not an X window
    /// (e.g. minifb picked Wayland).
    pub fn attach(raw: usize) -> Result<Self> {
        let window = u32::try_from(raw).map_err(|_| CrtError::Window(format!("{:#x} is not an X11 window id", raw)))?;
        let (conn, screen_num) = x11rb::connect(None).map_err(|e| x11_error("X11 connect failed", e))?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| CrtError::Window(format!("X11 screen {} missing", screen_num)))?;

        conn.get_window_attributes(window)
            .map_err(|e| x11_error("X11 request failed", e))?
            .reply()
            .map_err(|e| x11_error("Not an X11 window", e))?;

        let intern = |name: &[u8]| -> Result<Atom> {
            Ok(conn
                .intern_atom(false, name)
                .map_err(|e| x11_error("X11 request failed", e))?
                .reply()
                .map_err(|e| x11_error("intern_atom failed", e))?
                .atom)
        };
        let atoms = Atoms {
            wm_window_type: intern(b"_NET_WM_WINDOW_TYPE")?,
            wm_window_type_dock: intern(b"_NET_WM_WINDOW_TYPE_DOCK")?,
            wm_state: intern(b"_NET_WM_STATE")?,
            wm_state_above: intern(b"_NET_WM_STATE_ABOVE")?,
            wm_state_sticky: intern(b"_NET_WM_STATE_STICKY")?,
        };

        Ok(Self {
            conn,
            root,
            window,
            atoms,
        })
    }

    /// Dock type, above and sticky, and an empty input shape so clicks fall
    /// through to whatever is underneath.
    pub fn make_overlay(&self) -> Result<()> {
        self.conn
            .change_property32(
                PropMode::REPLACE,
                self.window,
                self.atoms.wm_window_type,
                AtomEnum::ATOM,
                &[self.atoms.wm_window_type_dock],
            )
            .map_err(|e| x11_error("Failed to set window type", e))?;
        self.assert_above()?;

        match self.conn.extension_information(shape::X11_EXTENSION_NAME) {
            Ok(Some(_)) => {
                self.conn
                    .shape_rectangles(
                        shape::SO::SET,
                        shape::SK::INPUT,
                        ClipOrdering::UNSORTED,
                        self.window,
                        0,
                        0,
                        &[],
                    )
                    .map_err(|e| x11_error("Failed to clear input shape", e))?;
            }
            _ => log_warn!("X server lacks the SHAPE extension; overlay will take mouse input"),
        }

        self.flush()
    }

    /// Unmaps the window. `true` once the server reports it unmapped.
    pub fn unmap(&self) -> Result<bool> {
        self.conn
            .unmap_window(self.window)
            .map_err(|e| x11_error("unmap_window failed", e))?;
        self.flush()?;
        Ok(self.map_state()? != MapState::VIEWABLE)
    }

    /// Maps the window again and re-raises it above everything else.
    pub fn map(&self) -> Result<()> {
        // a withdrawn window loses _NET_WM_STATE, so set it before mapping
        self.conn
            .change_property32(
                PropMode::REPLACE,
                self.window,
                self.atoms.wm_state,
                AtomEnum::ATOM,
                &[self.atoms.wm_state_above, self.atoms.wm_state_sticky],
            )
            .map_err(|e| x11_error("Failed to set window state", e))?;
        self.conn
            .map_window(self.window)
            .map_err(|e| x11_error("map_window failed", e))?;
        self.assert_above()?;
        self.flush()
    }

    /// Asks the window manager for above and sticky, and restacks on top.
    pub fn assert_above(&self) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            self.window,
            self.atoms.wm_state,
            [
                NET_WM_STATE_ADD,
                self.atoms.wm_state_above,
                self.atoms.wm_state_sticky,
                1,
                0,
            ],
        );
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )
            .map_err(|e| x11_error("Failed to send _NET_WM_STATE", e))?;
        self.conn
            .configure_window(self.window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))
            .map_err(|e| x11_error("configure_window failed", e))?;
        Ok(())
    }

    /// Where the server actually put the window, in root coordinates.
    pub fn placement(&self) -> Result<MonitorGeometry> {
        let geometry = self
            .conn
            .get_geometry(self.window)
            .map_err(|e| x11_error("X11 request failed", e))?
            .reply()
            .map_err(|e| x11_error("get_geometry failed", e))?;
        let origin = self
            .conn
            .translate_coordinates(self.window, self.root, 0, 0)
            .map_err(|e| x11_error("X11 request failed", e))?
            .reply()
            .map_err(|e| x11_error("translate_coordinates failed", e))?;
        Ok(MonitorGeometry::new(
            origin.dst_x as i32,
            origin.dst_y as i32,
            geometry.width as u32,
            geometry.height as u32,
        ))
    }

    fn map_state(&self) -> Result<MapState> {
        Ok(self
            .conn
            .get_window_attributes(self.window)
            .map_err(|e| x11_error("X11 request failed", e))?
            .reply()
            .map_err(|e| x11_error("get_window_attributes failed", e))?
            .map_state)
    }

    fn flush(&self) -> Result<()> {
        self.conn.flush().map_err(|e| x11_error("X11 flush failed", e))
    }
}
