use {
    crate::{
        gui::{self, open_with::OpenWithDialog, Ui},
        integration::{ProcessLauncher, Remote, Supervisor},
        service::{HelperKind, ServiceName},
    },
    bstr::ByteSlice,
    error_reporter::Report,
    gtk4::glib::MainContext,
    std::{
        cell::Cell,
        env, io,
        os::unix::ffi::OsStrExt,
        path::{Path, PathBuf},
        rc::Rc,
    },
    thiserror::Error,
    url::Url,
    zbus::Connection,
};

#[derive(Debug, Error)]
pub enum FileArgError {
    #[error("`{0}` is not a valid URI")]
    InvalidUri(String, #[source] url::ParseError),
    #[error("`{0}` does not refer to a local file")]
    NotLocal(String),
    #[error("Could not determine the working directory")]
    WorkingDir(#[source] io::Error),
}

/// Turns a path or `file://` URI into the absolute path string sent to the helper.
///
/// Paths that are not valid UTF-8 are converted lossily.
pub fn resolve_file(arg: &str) -> Result<String, FileArgError> {
    let path = if arg.starts_with("file:") {
        Url::parse(arg)
            .map_err(|e| FileArgError::InvalidUri(arg.to_string(), e))?
            .to_file_path()
            .map_err(|_| FileArgError::NotLocal(arg.to_string()))?
    } else {
        PathBuf::from(arg)
    };
    let path = if path.is_absolute() {
        path
    } else {
        env::current_dir()
            .map_err(FileArgError::WorkingDir)?
            .join(path)
    };
    Ok(path_to_string(&path))
}

fn path_to_string(path: &Path) -> String {
    path.as_os_str().as_bytes().to_str_lossy().into_owned()
}

pub struct OpenWith {
    pub service: ServiceName,
    pub allowed_backends: String,
    pub parent_window: String,
    pub filepath: String,
}

impl OpenWith {
    /// Runs the dialog in a helper process and waits for its answer.
    pub fn run_remote(self) -> bool {
        let context = MainContext::default();
        context.block_on(self.remote())
    }

    async fn remote(self) -> bool {
        let connection = match Connection::session().await {
            Ok(c) => Some(c),
            Err(e) => {
                log::warn!(
                    "No session bus, GTK integration is disabled: {}",
                    Report::new(e)
                );
                None
            }
        };
        let remote = Rc::new(Remote::new(connection.clone(), self.service.clone()));
        let Some(connection) = connection else {
            return remote
                .show_open_with_dialog(&self.parent_window, &self.filepath)
                .await;
        };
        let launcher = match ProcessLauncher::current() {
            Ok(l) => l,
            Err(e) => {
                log::error!("Could not locate the helper binary: {}", Report::new(e));
                return false;
            }
        };
        let supervisor = Supervisor::new(
            HelperKind::Main,
            self.service.clone(),
            self.allowed_backends.clone(),
            connection.unique_name().map(|n| n.to_string()),
            launcher,
        );

        let (ready_send, ready) = async_channel::bounded(1);
        let watched = remote.clone();
        MainContext::default().spawn_local(async move {
            if let Err(e) = supervisor.watch(&connection, &watched, ready_send).await {
                log::error!("Helper supervision stopped: {}", Report::new(e));
            }
        });
        // The sender is dropped if supervision ends before the helper shows up.
        if ready.recv().await.is_err() {
            return false;
        }
        log::debug!("Helper {} is ready", remote.service());
        remote
            .show_open_with_dialog(&self.parent_window, &self.filepath)
            .await
    }

    /// Runs the dialog in this process.
    pub fn run_local(self) -> bool {
        let local = Local::new();
        local.load(&self.allowed_backends);
        local.show_open_with_dialog(self.parent_window, self.filepath)
    }
}

/// Guards the in-process GTK load. Loading twice is a bug in the caller.
#[derive(Default)]
struct LoadOnce {
    loaded: Cell<bool>,
}

impl LoadOnce {
    fn claim(&self) {
        assert!(!self.loaded.replace(true), "GTK integration loaded twice");
    }
}

/// GTK in the parent process itself.
struct Local {
    ui: Ui,
    once: LoadOnce,
}

impl Local {
    fn new() -> Self {
        Self {
            ui: Ui::new(),
            once: LoadOnce::default(),
        }
    }

    fn load(&self, allowed_backends: &str) {
        self.once.claim();
        gui::load(allowed_backends);
    }

    fn show_open_with_dialog(&self, parent_window: String, filepath: String) -> bool {
        let dialog = OpenWithDialog {
            parent_window,
            filepath,
        };
        match dialog.show() {
            Ok(responses) => self.ui.block_on(responses.recv()).unwrap_or(false),
            Err(e) => {
                log::warn!("Could not show the open-with dialog: {}", Report::new(e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(resolve_file("/tmp/a.bin").unwrap(), "/tmp/a.bin");
    }

    #[test]
    fn relative_paths_are_made_absolute() {
        let resolved = resolve_file("a.bin").unwrap();
        let expected = env::current_dir().unwrap().join("a.bin");
        assert_eq!(resolved, path_to_string(&expected));
    }

    #[test]
    fn file_uris_are_decoded() {
        assert_eq!(
            resolve_file("file:///tmp/with%20space.bin").unwrap(),
            "/tmp/with space.bin"
        );
        assert!(matches!(
            resolve_file("file://remote-host/tmp/a.bin"),
            Err(FileArgError::NotLocal(_))
        ));
    }

    #[test]
    fn non_utf8_paths_are_lossy() {
        use std::ffi::OsStr;
        let path = Path::new(OsStr::from_bytes(b"/tmp/\xffname"));
        assert_eq!(path_to_string(path), "/tmp/\u{fffd}name");
    }

    #[test]
    fn first_load_is_allowed() {
        LoadOnce::default().claim();
    }

    #[test]
    #[should_panic(expected = "GTK integration loaded twice")]
    fn second_load_panics() {
        let once = LoadOnce::default();
        once.claim();
        once.claim();
    }
}
