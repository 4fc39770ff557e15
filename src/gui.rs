use {
    crate::integration::{Backend, BoxFuture, DialogError},
    async_channel::Receiver,
    error_reporter::Report,
    gtk4::{
        glib,
        glib::{MainContext, MainLoop},
    },
    open_with::OpenWithDialog,
    std::{
        future::Future,
        panic::{self, AssertUnwindSafe},
    },
};

pub mod open_with;

pub struct Ui {
    main_loop: MainLoop,
    proxy: UiProxy,
}

impl Ui {
    /// Creates the main loop. GTK itself is only initialized by [`load`].
    pub fn new() -> Self {
        glib::set_prgname(Some("gtk-integration"));

        let main_loop = MainLoop::new(None, false);
        Self {
            proxy: UiProxy {
                context: main_loop.context().clone(),
            },
            main_loop,
        }
    }

    pub fn run(&self) {
        self.main_loop.run();
    }

    pub fn main_loop(&self) -> &MainLoop {
        &self.main_loop
    }

    pub fn proxy(&self) -> &UiProxy {
        &self.proxy
    }

    /// Drives `f` on the UI thread while other sources of the main context keep running.
    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        self.main_loop.context().block_on(f)
    }
}

/// Handle that can be used from any thread to run GTK operations on the UI thread.
#[derive(Clone)]
pub struct UiProxy {
    context: MainContext,
}

impl UiProxy {
    /// Runs `f` on the UI thread.
    ///
    /// The receiver yields the result of `f`. It is closed without a value if `f` panics.
    fn run<T, F>(&self, f: F) -> Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (send, recv) = async_channel::bounded(1);
        self.context.invoke(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(res) => {
                let _ = send.try_send(res);
            }
            Err(_) => log::error!("A GTK operation panicked"),
        });
        recv
    }
}

impl Backend for UiProxy {
    fn load(&self, allowed_backends: String) -> BoxFuture<Result<(), DialogError>> {
        let done = self.run(move || {
            load(&allowed_backends);
        });
        Box::pin(async move { done.recv().await.map_err(|_| DialogError::Closed) })
    }

    fn open_with_dialog(
        &self,
        parent_window: String,
        filepath: String,
    ) -> BoxFuture<Result<Receiver<bool>, DialogError>> {
        let dialog = self.run(move || {
            OpenWithDialog {
                parent_window,
                filepath,
            }
            .show()
        });
        Box::pin(async move { dialog.recv().await.map_err(|_| DialogError::Closed)? })
    }
}

/// Initializes GTK on the current thread. Returns whether GTK is usable afterwards.
///
/// `allowed_backends` is a comma-separated list of GDK backends. An empty list lets GDK
/// decide.
pub fn load(allowed_backends: &str) -> bool {
    if gtk4::is_initialized_main_thread() {
        log::debug!("GTK is already loaded");
        return true;
    }
    if !allowed_backends.is_empty() {
        gtk4::gdk::set_allowed_backends(allowed_backends);
    }
    match gtk4::init() {
        Ok(()) => {
            log::info!("GTK loaded");
            true
        }
        Err(e) => {
            log::error!("Could not initialize GTK: {}", Report::new(e));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy() -> (MainContext, UiProxy) {
        let context = MainContext::new();
        let proxy = UiProxy {
            context: context.clone(),
        };
        (context, proxy)
    }

    #[test]
    fn results_come_back_from_the_ui_thread() {
        let (context, proxy) = proxy();
        let res = proxy.run(|| 7);
        assert_eq!(context.block_on(res.recv()), Ok(7));
    }

    #[test]
    fn panic_on_the_ui_thread_closes_the_result() {
        let (context, proxy) = proxy();
        let res = proxy.run(|| -> bool { panic!("dialog exploded") });
        assert!(context.block_on(res.recv()).is_err());
        let res = proxy.run(|| 1);
        assert_eq!(context.block_on(res.recv()), Ok(1));
    }
}
