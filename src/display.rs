use std::env;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DisplayBackend {
    Wayland,
    X11,
    Unknown,
}

impl DisplayBackend {
    pub fn detect() -> Self {
        Self::from_env(
            env::var_os("WAYLAND_DISPLAY").is_some(),
            env::var_os("DISPLAY").is_some(),
        )
    }

    fn from_env(wayland_display: bool, display: bool) -> Self {
        if wayland_display {
            DisplayBackend::Wayland
        } else if display {
            DisplayBackend::X11
        } else {
            DisplayBackend::Unknown
        }
    }

    /// The GDK backends the helper may use, preferred one first.
    pub fn allowed_backends(self) -> &'static str {
        match self {
            DisplayBackend::Wayland => "wayland,x11",
            DisplayBackend::X11 => "x11,wayland",
            DisplayBackend::Unknown => "",
        }
    }
}

/// What the parent knows about its currently active window.
#[derive(Clone, Debug, Default)]
pub struct ActiveWindow {
    /// A handle exported through xdg-foreign.
    pub wayland_handle: Option<String>,
    pub x11_window: Option<u64>,
}

/// Formats the token the helper uses to make its dialog transient for the parent window.
///
/// Returns an empty string if there is no active window or no handle for the running backend.
pub fn parent_window_token(backend: DisplayBackend, window: Option<&ActiveWindow>) -> String {
    let Some(window) = window else {
        return String::new();
    };
    match backend {
        DisplayBackend::Wayland => match window.wayland_handle.as_deref() {
            Some(handle) if !handle.is_empty() => format!("wayland:{handle}"),
            _ => String::new(),
        },
        DisplayBackend::X11 => match window.x11_window {
            Some(id) => format!("x11:{id:x}"),
            None => String::new(),
        },
        DisplayBackend::Unknown => String::new(),
    }
}
