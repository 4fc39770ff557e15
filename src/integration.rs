use std::{future::Future, pin::Pin};

pub use {
    dispatch::{Backend, DialogError, Dispatcher},
    remote::Remote,
    server::Server,
    supervisor::{ProcessLauncher, Supervisor},
};

mod dispatch;
mod interface;
mod remote;
mod server;
mod supervisor;

pub const PATH: &str = "/dev/gtk_integration/GtkIntegration";

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
