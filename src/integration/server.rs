use {
    crate::{
        gui::Ui,
        integration::{interface::Integration, Dispatcher, PATH},
        service::ServiceName,
    },
    error_reporter::Report,
    gtk4::glib::MainLoop,
    std::{sync::Arc, thread},
    thiserror::Error,
    zbus::{
        blocking::{fdo::DBusProxy as DBusProxyBlocking, Connection},
        fdo::{self, RequestNameFlags, RequestNameReply},
        names::{BusName, UniqueName},
    },
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not connect to session bus")]
    Connection(#[source] zbus::Error),
    #[error("Could not add the integration interface")]
    AddInterface(#[source] zbus::Error),
    #[error("Could not acquire name {0}")]
    AcquireName(ServiceName, #[source] zbus::Error),
    #[error("Name {0} is owned by another helper")]
    NameTaken(ServiceName),
    #[error("Could not create dbus proxy")]
    CreateDbusProxy(#[source] zbus::Error),
    #[error("Could not subscribe to name-lost events")]
    SubscribeNameLost(#[source] zbus::Error),
    #[error("`{0}` is not a valid bus name")]
    InvalidParent(String, #[source] zbus::names::Error),
    #[error("Could not watch the parent process")]
    WatchParent(#[source] zbus::Error),
    #[error("Could not look up the parent process")]
    LookupParent(#[source] fdo::Error),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServerState {
    Unregistered,
    Registered,
    Running,
    Stopped,
}

impl ServerState {
    fn can_become(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Unregistered, Registered) | (Registered, Running | Stopped) | (Running, Stopped)
        )
    }
}

/// The helper side: serves calls from a single parent process until that process exits.
pub struct Server {
    state: ServerState,
    session: Connection,
    parent: String,
    service: ServiceName,
}

impl Server {
    pub fn register(ui: &Ui, parent: String, service: ServiceName) -> Result<Self, ServerError> {
        let session = Connection::session().map_err(ServerError::Connection)?;
        let mut server = Self {
            state: ServerState::Unregistered,
            session,
            parent,
            service,
        };

        let dispatcher = Dispatcher::new(server.parent.clone(), Arc::new(ui.proxy().clone()));
        server
            .session
            .object_server()
            .at(PATH, Integration::new(dispatcher))
            .map_err(ServerError::AddInterface)?;

        let mut name_lost_iterator = DBusProxyBlocking::new(&server.session)
            .map_err(ServerError::CreateDbusProxy)?
            .receive_name_lost()
            .map_err(ServerError::SubscribeNameLost)?;
        let service = server.service.clone();
        thread::spawn(move || {
            name_lost_iterator.next();
            log::warn!("Lost name {service} to a newer helper");
            std::process::exit(0);
        });

        // A helper started for a newer parent takes over the name from a stale one.
        let flags = RequestNameFlags::AllowReplacement
            | RequestNameFlags::ReplaceExisting
            | RequestNameFlags::DoNotQueue;
        let reply = server
            .session
            .request_name_with_flags(server.service.as_str(), flags)
            .map_err(|e| ServerError::AcquireName(server.service.clone(), e))?;
        match reply {
            RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => {}
            _ => return Err(ServerError::NameTaken(server.service.clone())),
        }

        server.transition(ServerState::Registered);
        Ok(server)
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    fn transition(&mut self, next: ServerState) {
        assert!(
            self.state.can_become(next),
            "invalid server transition {:?} -> {:?}",
            self.state,
            next,
        );
        log::debug!("Server {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the UI until the parent exits.
    pub fn run(&mut self, ui: &Ui) -> Result<(), ServerError> {
        let dbus = DBusProxyBlocking::new(&self.session).map_err(ServerError::CreateDbusProxy)?;
        let parent = BusName::try_from(self.parent.as_str())
            .map_err(|e| ServerError::InvalidParent(self.parent.clone(), e))?;

        // Subscribe before checking so that a parent exiting in between is not missed.
        let owner_changes = dbus
            .receive_name_owner_changed_with_args(&[(0, self.parent.as_str())])
            .map_err(ServerError::WatchParent)?;
        if !dbus
            .name_has_owner(parent)
            .map_err(ServerError::LookupParent)?
        {
            log::warn!("Parent {} is already gone", self.parent);
            self.transition(ServerState::Stopped);
            return Ok(());
        }

        let main_loop = ui.main_loop().clone();
        let parent = self.parent.clone();
        thread::spawn(move || {
            let owners = owner_changes.filter_map(|signal| match signal.args() {
                Ok(args) => {
                    let owner: &Option<UniqueName<'_>> = args.new_owner();
                    Some(owner.as_ref().map(|o| o.to_string()))
                }
                Err(e) => {
                    log::warn!("Malformed NameOwnerChanged: {}", Report::new(e));
                    None
                }
            });
            if !quit_when_vanished(owners, &parent, &main_loop) {
                log::warn!("Stopped receiving owner changes of {parent}");
                main_loop.quit();
            }
        });

        self.transition(ServerState::Running);
        log::info!("Serving {} for {}", self.service, self.parent);
        ui.run();
        self.transition(ServerState::Stopped);
        Ok(())
    }
}

/// Quits `main_loop` once `parent` no longer has an owner.
///
/// Returns `false` without quitting if `owners` ends first.
fn quit_when_vanished<I>(owners: I, parent: &str, main_loop: &MainLoop) -> bool
where
    I: IntoIterator<Item = Option<String>>,
{
    for owner in owners {
        match owner {
            None => {
                log::info!("Parent {parent} vanished");
                main_loop.quit();
                return true;
            }
            Some(owner) => log::debug!("Parent name {parent} is now owned by {owner}"),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use {
        super::{ServerState::*, *},
        gtk4::glib::MainContext,
    };

    fn running_loop() -> MainLoop {
        MainLoop::new(Some(&MainContext::new()), true)
    }

    #[test]
    fn vanished_parent_quits_the_loop() {
        let main_loop = running_loop();
        let owners = [Some(":1.5".to_string()), None, Some(":1.6".to_string())];
        assert!(quit_when_vanished(owners, ":1.5", &main_loop));
        assert!(!main_loop.is_running());
    }

    #[test]
    fn owner_changes_without_vanishing_keep_the_loop() {
        let main_loop = running_loop();
        let owners = [Some(":1.5".to_string()), Some(":1.6".to_string())];
        assert!(!quit_when_vanished(owners, ":1.5", &main_loop));
        assert!(main_loop.is_running());
    }

    #[test]
    fn transitions() {
        let all = [Unregistered, Registered, Running, Stopped];
        let allowed = [
            (Unregistered, Registered),
            (Registered, Running),
            (Registered, Stopped),
            (Running, Stopped),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_become(to),
                    allowed.contains(&(from, to)),
                    "{from:?} -> {to:?}",
                );
            }
        }
    }
}
