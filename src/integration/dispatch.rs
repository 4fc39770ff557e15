use {
    crate::integration::BoxFuture,
    async_channel::Receiver,
    error_reporter::Report,
    futures_util::FutureExt,
    std::{future::Future, panic::AssertUnwindSafe, sync::Arc},
    thiserror::Error,
    zbus::fdo,
};

/// The GTK side of the integration.
pub trait Backend: Send + Sync + 'static {
    /// Initializes GTK restricted to the given comma-separated GDK backends.
    ///
    /// Best effort. Calling this again after a successful load does nothing. Fails only if
    /// the operation did not run to completion.
    fn load(&self, allowed_backends: String) -> BoxFuture<Result<(), DialogError>>;

    /// Shows an application chooser for `filepath`.
    ///
    /// The returned receiver yields the user's answer once. It is closed without a value if
    /// the dialog goes away without an answer.
    fn open_with_dialog(
        &self,
        parent_window: String,
        filepath: String,
    ) -> BoxFuture<Result<Receiver<bool>, DialogError>>;
}

#[derive(Debug, Error)]
pub enum DialogError {
    #[error("GTK has not been loaded")]
    NotLoaded,
    #[error("File {0} does not exist")]
    NoSuchFile(String),
    #[error("The UI operation did not complete")]
    Closed,
}

/// Reply categories visible to callers.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum CallError {
    #[error("Access denied.")]
    AccessDenied,
    #[error("Method does not exist.")]
    UnknownMethod,
}

impl From<CallError> for fdo::Error {
    fn from(e: CallError) -> Self {
        match e {
            CallError::AccessDenied => fdo::Error::AccessDenied(e.to_string()),
            CallError::UnknownMethod => fdo::Error::UnknownMethod(e.to_string()),
        }
    }
}

/// Checks callers against the pinned parent and forwards their requests to the backend.
pub struct Dispatcher {
    parent: String,
    backend: Arc<dyn Backend>,
}

impl Dispatcher {
    pub fn new(parent: String, backend: Arc<dyn Backend>) -> Self {
        Self { parent, backend }
    }

    /// The unique bus name of the only process allowed to call us.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    fn authorize(&self, sender: Option<&str>) -> Result<(), CallError> {
        match sender {
            Some(sender) if sender == self.parent => Ok(()),
            _ => {
                log::warn!(
                    "Rejecting call from {} (expected {})",
                    sender.unwrap_or("<unknown>"),
                    self.parent,
                );
                Err(CallError::AccessDenied)
            }
        }
    }

    pub async fn load(
        &self,
        sender: Option<&str>,
        allowed_backends: String,
    ) -> Result<(), CallError> {
        self.authorize(sender)?;
        log::info!("Loading GTK with allowed backends `{allowed_backends}`");
        let res = contain("Load", async { self.backend.load(allowed_backends).await }).await?;
        res.map_err(|e| {
            log::error!("Could not load GTK: {}", Report::new(e));
            CallError::UnknownMethod
        })
    }

    pub async fn show_open_with_dialog(
        &self,
        sender: Option<&str>,
        parent_window: String,
        filepath: String,
    ) -> Result<Receiver<bool>, CallError> {
        self.authorize(sender)?;
        let res = contain("ShowOpenWithDialog", async {
            self.backend
                .open_with_dialog(parent_window, filepath)
                .await
        })
        .await?;
        res.map_err(|e| {
            log::error!("Could not create the open-with dialog: {}", Report::new(e));
            CallError::UnknownMethod
        })
    }
}

/// Turns a panic inside a backend operation into an `UnknownMethod` reply.
async fn contain<T>(method: &str, f: impl Future<Output = T>) -> Result<T, CallError> {
    match AssertUnwindSafe(f).catch_unwind().await {
        Ok(v) => Ok(v),
        Err(_) => {
            log::error!("{method} panicked");
            Err(CallError::UnknownMethod)
        }
    }
}
