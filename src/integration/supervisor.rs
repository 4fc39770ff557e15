use {
    crate::{
        integration::Remote,
        service::{HelperKind, ServiceName},
    },
    async_channel::{Receiver, Sender},
    error_reporter::Report,
    futures_util::{future, select, FutureExt, Stream, StreamExt},
    std::{
        cell::{Cell, RefCell},
        env,
        ffi::OsString,
        io,
        os::unix::process::CommandExt,
        path::PathBuf,
        pin::pin,
        process::{Command, Stdio},
        thread,
    },
    thiserror::Error,
    zbus::{fdo::DBusProxy, names::UniqueName, Connection},
};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("The parent has no unique bus name")]
    NoUniqueName,
    #[error("Could not launch the helper")]
    Launch(#[source] io::Error),
    #[error("Could not watch the helper name")]
    Watch(#[source] zbus::Error),
    #[error("The helper exited before it acquired its name")]
    NeverAppeared,
}

pub trait Launcher {
    /// Starts a helper with `args`. `exited` receives a message (or is dropped) once the
    /// helper process is gone.
    fn launch(&self, args: &[OsString], exited: Sender<()>) -> io::Result<()>;
}

/// Starts helpers by re-executing the current binary in its own session.
pub struct ProcessLauncher {
    exe: PathBuf,
}

impl ProcessLauncher {
    pub fn current() -> io::Result<Self> {
        Ok(Self {
            exe: env::current_exe()?,
        })
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, args: &[OsString], exited: Sender<()>) -> io::Result<()> {
        let mut command = Command::new(&self.exe);
        command.args(args).stdin(Stdio::null());
        // SAFETY: setsid is async-signal-safe.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let mut child = command.spawn()?;
        let pid = child.id();
        log::info!("Launched helper with pid {pid}");
        thread::spawn(move || {
            match child.wait() {
                Ok(status) => log::info!("Helper {pid} exited: {status}"),
                Err(e) => log::warn!("Could not wait for helper {pid}: {}", Report::new(e)),
            }
            let _ = exited.send_blocking(());
        });
        Ok(())
    }
}

/// Keeps a helper alive for the lifetime of the parent.
///
/// The helper keeps no state across restarts, so every time it appears the configured
/// backends are loaded again.
pub struct Supervisor<L = ProcessLauncher> {
    kind: HelperKind,
    service: ServiceName,
    allowed_backends: String,
    parent: Option<String>,
    launcher: L,
    /// Exit notification of the most recently launched helper.
    exited: RefCell<Option<Receiver<()>>>,
    /// Whether the most recently launched helper has owned the name.
    appeared: Cell<bool>,
}

enum Event {
    OwnerChanged(Option<String>),
    Exited,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(
        kind: HelperKind,
        service: ServiceName,
        allowed_backends: String,
        parent: Option<String>,
        launcher: L,
    ) -> Self {
        Self {
            kind,
            service,
            allowed_backends,
            parent,
            launcher,
            exited: RefCell::new(None),
            appeared: Cell::new(false),
        }
    }

    fn helper_args(&self, parent: &str) -> Vec<OsString> {
        [
            "helper",
            "--kind",
            self.kind.as_arg(),
            parent,
            self.service.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }

    /// Launches the helper. Returns whether a process was started.
    pub fn start(&self) -> Result<bool, SupervisorError> {
        if !self.kind.is_launchable() {
            return Ok(false);
        }
        let parent = self.parent.as_deref().ok_or(SupervisorError::NoUniqueName)?;
        let (send, exited) = async_channel::bounded(1);
        self.launcher
            .launch(&self.helper_args(parent), send)
            .map_err(SupervisorError::Launch)?;
        self.appeared.set(false);
        *self.exited.borrow_mut() = Some(exited);
        Ok(true)
    }

    /// Reacts to a change of the helper's name owner.
    ///
    /// Returns the backends to load if the helper has (re)appeared.
    fn on_owner_changed(&self, new_owner: Option<&str>) -> Option<&str> {
        match new_owner {
            None => {
                log::warn!("Helper {} vanished, restarting it", self.service);
                if let Err(e) = self.start() {
                    log::error!("Could not restart the helper: {}", Report::new(e));
                }
                None
            }
            Some(owner) => {
                log::info!("Helper {} is now owned by {owner}", self.service);
                self.appeared.set(true);
                Some(&self.allowed_backends)
            }
        }
    }

    /// Reacts to the exit of the most recently launched helper.
    ///
    /// A helper that has owned the name is restarted once the name vanishes. One that never
    /// got that far will not come back by itself.
    fn on_helper_exited(&self) -> Result<(), SupervisorError> {
        self.exited.borrow_mut().take();
        match self.appeared.get() {
            true => Ok(()),
            false => Err(SupervisorError::NeverAppeared),
        }
    }

    /// Starts the helper and restarts it whenever it disappears.
    ///
    /// `ready` receives a message each time the helper has appeared and was loaded. It is
    /// dropped when supervision ends.
    pub async fn watch(
        &self,
        connection: &Connection,
        remote: &Remote,
        ready: Sender<()>,
    ) -> Result<(), SupervisorError> {
        let dbus = DBusProxy::new(connection)
            .await
            .map_err(SupervisorError::Watch)?;
        let owners = dbus
            .receive_name_owner_changed_with_args(&[(0, self.service.as_str())])
            .await
            .map_err(SupervisorError::Watch)?
            .filter_map(|signal| {
                future::ready(match signal.args() {
                    Ok(args) => {
                        let owner: &Option<UniqueName<'_>> = args.new_owner();
                        Some(owner.as_ref().map(|o| o.to_string()))
                    }
                    Err(e) => {
                        log::warn!("Malformed NameOwnerChanged: {}", Report::new(e));
                        None
                    }
                })
            });
        self.start()?;
        self.supervise(owners, remote, ready).await
    }

    /// Follows owner changes of the helper name and exits of launched helpers.
    async fn supervise<S>(
        &self,
        owners: S,
        remote: &Remote,
        ready: Sender<()>,
    ) -> Result<(), SupervisorError>
    where
        S: Stream<Item = Option<String>>,
    {
        let mut owners = pin!(owners);
        loop {
            let exit = helper_exit(self.exited.borrow().clone()).fuse();
            let mut exit = pin!(exit);
            let event = select! {
                owner = owners.next().fuse() => owner.map(Event::OwnerChanged),
                () = exit => Some(Event::Exited),
            };
            match event {
                None => return Ok(()),
                Some(Event::OwnerChanged(owner)) => {
                    if let Some(backends) = self.on_owner_changed(owner.as_deref()) {
                        remote.load(backends).await;
                        let _ = ready.try_send(());
                    }
                }
                Some(Event::Exited) => self.on_helper_exited()?,
            }
        }
    }
}

async fn helper_exit(exited: Option<Receiver<()>>) {
    match exited {
        Some(exited) => {
            let _ = exited.recv().await;
        }
        None => future::pending().await,
    }
}
