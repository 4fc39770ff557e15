use {
    crate::service::ServiceName,
    error_reporter::Report,
    futures_util::{future, select, FutureExt, Stream, StreamExt},
    std::pin::pin,
    thiserror::Error,
    zbus::{fdo::DBusProxy, proxy, Connection},
};

#[proxy(
    interface = "dev.gtk_integration.GtkIntegration",
    default_path = "/dev/gtk_integration/GtkIntegration",
    gen_blocking = false
)]
trait GtkIntegration {
    fn load(&self, allowed_backends: &str) -> zbus::Result<()>;

    fn show_open_with_dialog(&self, parent: &str, filepath: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn open_with_dialog_response(&self, result: bool) -> zbus::Result<()>;
}

const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("There is no session bus connection")]
    Unreachable,
    #[error("Could not create a proxy for the helper")]
    Proxy(#[source] zbus::Error),
    #[error("Could not subscribe to helper signals")]
    Subscribe(#[source] zbus::Error),
    #[error("The helper rejected the call")]
    Rejected(#[source] zbus::Error),
    #[error("The helper does not support the call")]
    Unsupported(#[source] zbus::Error),
    #[error("The helper vanished before the dialog was answered")]
    HelperVanished,
    #[error("The helper stopped sending responses")]
    NoResponse,
}

impl RemoteError {
    fn from_call(e: zbus::Error) -> Self {
        match &e {
            zbus::Error::MethodError(name, _, _) if is_access_denied(name.as_str()) => {
                RemoteError::Rejected(e)
            }
            _ => RemoteError::Unsupported(e),
        }
    }
}

fn is_access_denied(name: &str) -> bool {
    name == ACCESS_DENIED
}

/// Forwards GTK operations to the helper serving `service`.
///
/// Failures never reach the caller. Without a connection every operation is a no-op.
pub struct Remote {
    connection: Option<Connection>,
    service: ServiceName,
}

impl Remote {
    pub fn new(connection: Option<Connection>, service: ServiceName) -> Self {
        Self {
            connection,
            service,
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    fn connection(&self) -> Result<&Connection, RemoteError> {
        self.connection.as_ref().ok_or(RemoteError::Unreachable)
    }

    async fn proxy(&self) -> Result<GtkIntegrationProxy<'_>, RemoteError> {
        GtkIntegrationProxy::builder(self.connection()?)
            .destination(self.service.as_str())
            .map_err(RemoteError::Proxy)?
            .build()
            .await
            .map_err(RemoteError::Proxy)
    }

    pub async fn load(&self, allowed_backends: &str) {
        if let Err(e) = self.try_load(allowed_backends).await {
            log::warn!("Could not load GTK in the helper: {}", Report::new(e));
        }
    }

    async fn try_load(&self, allowed_backends: &str) -> Result<(), RemoteError> {
        self.proxy()
            .await?
            .load(allowed_backends)
            .await
            .map_err(RemoteError::from_call)
    }

    /// Asks the helper to show an open-with dialog and waits for the answer.
    ///
    /// Returns `false` if the dialog could not be shown or no answer arrived.
    pub async fn show_open_with_dialog(&self, parent_window: &str, filepath: &str) -> bool {
        match self.try_show_open_with_dialog(parent_window, filepath).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Open-with dialog failed: {}", Report::new(e));
                false
            }
        }
    }

    async fn try_show_open_with_dialog(
        &self,
        parent_window: &str,
        filepath: &str,
    ) -> Result<bool, RemoteError> {
        let proxy = self.proxy().await?;
        // Both subscriptions exist before the call and are dropped on every return path.
        let responses = proxy
            .receive_open_with_dialog_response()
            .await
            .map_err(RemoteError::Subscribe)?
            .filter_map(|signal| {
                future::ready(match signal.args() {
                    Ok(args) => Some(*args.result()),
                    Err(e) => {
                        log::warn!("Malformed dialog response: {}", Report::new(e));
                        None
                    }
                })
            });
        let dbus = DBusProxy::new(self.connection()?)
            .await
            .map_err(RemoteError::Subscribe)?;
        let vanished = dbus
            .receive_name_owner_changed_with_args(&[(0, self.service.as_str())])
            .await
            .map_err(RemoteError::Subscribe)?
            .filter_map(|signal| {
                future::ready(match signal.args() {
                    Ok(args) if args.new_owner().is_none() => Some(()),
                    _ => None,
                })
            });
        proxy
            .show_open_with_dialog(parent_window, filepath)
            .await
            .map_err(RemoteError::from_call)?;
        await_response(responses, vanished).await
    }
}

/// Resolves with the first response, or fails once the helper vanishes.
pub(super) async fn await_response<R, V>(responses: R, vanished: V) -> Result<bool, RemoteError>
where
    R: Stream<Item = bool>,
    V: Stream<Item = ()>,
{
    let mut responses = pin!(responses);
    let mut vanished = pin!(vanished);
    select! {
        res = responses.next().fuse() => res.ok_or(RemoteError::NoResponse),
        _ = vanished.next().fuse() => Err(RemoteError::HelperVanished),
    }
}
