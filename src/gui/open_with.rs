use {
    crate::integration::DialogError,
    async_channel::Receiver,
    error_reporter::Report,
    gdk4_wayland::WaylandToplevel,
    gtk4::{
        gio::{
            prelude::{AppInfoExt, FileExt},
            AppLaunchContext, File,
        },
        prelude::{AppChooserExt, Cast, DialogExt, GtkWindowExt, NativeExt, WidgetExt},
        AppChooserDialog, DialogFlags, ResponseType, Widget, Window,
    },
    rust_i18n::t,
    std::path::Path,
};

/// An application chooser for a single file.
pub struct OpenWithDialog {
    /// `wayland:<handle>`, `x11:<id>`, or empty.
    pub parent_window: String,
    pub filepath: String,
}

impl OpenWithDialog {
    /// Shows the dialog. Must be called on the UI thread.
    ///
    /// The receiver yields `true` if the user picked an application or dismissed the dialog
    /// and `false` for any other outcome.
    pub fn show(self) -> Result<Receiver<bool>, DialogError> {
        if !gtk4::is_initialized_main_thread() {
            return Err(DialogError::NotLoaded);
        }
        if !Path::new(&self.filepath).exists() {
            return Err(DialogError::NoSuchFile(self.filepath));
        }
        let file = File::for_path(&self.filepath);
        let dialog = AppChooserDialog::new(Window::NONE, DialogFlags::MODAL, &file);
        dialog.set_title(Some(t!("Open With").as_ref()));

        let (send, recv) = async_channel::bounded(1);
        dialog.connect_response(move |dialog, response| {
            let result = match response {
                ResponseType::Ok => {
                    launch(dialog, &file);
                    true
                }
                ResponseType::Cancel | ResponseType::DeleteEvent => true,
                _ => false,
            };
            let _ = send.try_send(result);
            dialog.destroy();
        });

        dialog.upcast_ref::<Widget>().realize();
        set_transient_for(&dialog, &self.parent_window);
        dialog.show();
        Ok(recv)
    }
}

fn launch(dialog: &AppChooserDialog, file: &File) {
    let Some(app) = dialog.app_info() else {
        log::warn!("No application was selected");
        return;
    };
    log::info!("Opening {} with {}", file.parse_name(), app.name());
    if let Err(e) = app.launch(&[file.clone()], None::<&AppLaunchContext>) {
        log::error!("Could not launch {}: {}", app.name(), Report::new(e));
    }
}

fn set_transient_for(dialog: &AppChooserDialog, parent_window: &str) {
    let Some(handle) = wayland_handle(parent_window) else {
        if !parent_window.is_empty() {
            log::debug!("Ignoring parent window {parent_window}");
        }
        return;
    };
    if let Some(surface) = dialog.surface() {
        if let Some(toplevel) = surface.downcast_ref::<WaylandToplevel>() {
            toplevel.set_transient_for_exported(handle);
        }
    }
}

fn wayland_handle(parent_window: &str) -> Option<&str> {
    parent_window
        .strip_prefix("wayland:")
        .filter(|handle| !handle.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wayland_handles() {
        assert_eq!(wayland_handle("wayland:abc"), Some("abc"));
        assert_eq!(wayland_handle("wayland:"), None);
        assert_eq!(wayland_handle("x11:1f"), None);
        assert_eq!(wayland_handle(""), None);
    }

    #[test]
    fn dialog_requires_gtk() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let dialog = OpenWithDialog {
            parent_window: String::new(),
            filepath: file.path().to_string_lossy().into_owned(),
        };
        assert!(matches!(dialog.show(), Err(DialogError::NotLoaded)));
    }
}
