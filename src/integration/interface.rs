use {
    crate::integration::{Dispatcher, PATH},
    async_channel::Receiver,
    error_reporter::Report,
    std::{future::Future, sync::Arc},
    zbus::{
        fdo, interface, message::Header, names::BusName, object_server::SignalContext,
        Connection,
    },
};

pub struct Integration {
    dispatcher: Arc<Dispatcher>,
}

impl Integration {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

fn sender(header: &Header<'_>) -> Option<String> {
    header.sender().map(|s| s.to_string())
}

#[interface(name = "dev.gtk_integration.GtkIntegration")]
impl Integration {
    async fn load(
        &self,
        allowed_backends: String,
        #[zbus(header)] header: Header<'_>,
    ) -> fdo::Result<()> {
        let sender = sender(&header);
        self.dispatcher
            .load(sender.as_deref(), allowed_backends)
            .await?;
        Ok(())
    }

    async fn show_open_with_dialog(
        &self,
        parent: String,
        filepath: String,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
    ) -> fdo::Result<()> {
        let sender = sender(&header);
        let responses = self
            .dispatcher
            .show_open_with_dialog(sender.as_deref(), parent, filepath)
            .await?;
        let connection = connection.clone();
        let destination = self.dispatcher.parent().to_owned();
        let emit = {
            let connection = connection.clone();
            move |result: bool| async move {
                emit_response(&connection, &destination, result).await
            }
        };
        connection
            .executor()
            .spawn(forward_response(responses, emit), "open-with-dialog-response")
            .detach();
        Ok(())
    }

    /// Emitted to the parent once the user has answered the open-with dialog.
    #[zbus(signal)]
    async fn open_with_dialog_response(
        ctxt: &SignalContext<'_>,
        result: bool,
    ) -> zbus::Result<()>;
}

/// Sends the dialog answer to `destination` only.
async fn emit_response(
    connection: &Connection,
    destination: &str,
    result: bool,
) -> zbus::Result<()> {
    let ctxt = SignalContext::new(connection, PATH)?
        .set_destination(BusName::try_from(destination)?);
    Integration::open_with_dialog_response(&ctxt, result).await
}

/// Waits for the dialog and emits its answer. Nothing is emitted if the dialog goes away
/// without an answer.
async fn forward_response<F, Fut>(responses: Receiver<bool>, emit: F)
where
    F: FnOnce(bool) -> Fut,
    Fut: Future<Output = zbus::Result<()>>,
{
    let Ok(result) = responses.recv().await else {
        log::debug!("Open-with dialog went away without an answer");
        return;
    };
    log::info!("Open-with dialog answered {result}");
    if let Err(e) = emit(result).await {
        log::error!("Could not send the dialog response: {}", Report::new(e));
    }
}

#[cfg(test)]
mod tests {
    use {super::*, gtk4::glib::MainContext, std::cell::RefCell};

    fn forwarded(responses: Receiver<bool>) -> Vec<bool> {
        let emitted = RefCell::new(vec![]);
        MainContext::new().block_on(forward_response(responses, |result| {
            emitted.borrow_mut().push(result);
            async { Ok(()) }
        }));
        emitted.into_inner()
    }

    #[test]
    fn answer_is_emitted_once() {
        let (send, responses) = async_channel::bounded(1);
        send.try_send(false).unwrap();
        assert_eq!(forwarded(responses), vec![false]);
    }

    #[test]
    fn closed_dialog_emits_nothing() {
        let (send, responses) = async_channel::bounded::<bool>(1);
        drop(send);
        assert!(forwarded(responses).is_empty());
    }

    #[test]
    fn failed_emission_is_swallowed() {
        let (send, responses) = async_channel::bounded(1);
        send.try_send(true).unwrap();
        MainContext::new().block_on(forward_response(responses, |_| async {
            Err(zbus::Error::InvalidReply)
        }));
    }
}
