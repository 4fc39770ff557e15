use {
    clap::ValueEnum,
    std::{
        env,
        fmt::{self, Display, Formatter},
        io,
        os::unix::ffi::OsStrExt,
        path::Path,
    },
    thiserror::Error,
};

const PREFIX: &str = "dev.gtk_integration";

/// Number of hex characters of the working directory digest used in service names.
const HASH_LEN: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum HelperKind {
    /// The main integration helper that shows dialogs.
    Main,
    /// The helper that only loads the GTK backend.
    Base,
    /// The webview helper. Its name is derived here but it is launched elsewhere.
    Webview,
}

impl HelperKind {
    /// The value passed to `helper --kind`.
    pub fn as_arg(self) -> &'static str {
        match self {
            HelperKind::Main => "main",
            HelperKind::Base => "base",
            HelperKind::Webview => "webview",
        }
    }

    /// Whether the supervisor starts helpers of this kind itself.
    pub fn is_launchable(self) -> bool {
        matches!(self, HelperKind::Main | HelperKind::Base)
    }
}

#[derive(Debug, Error)]
pub enum ServiceNameError {
    #[error("Could not determine the working directory")]
    WorkingDir(#[source] io::Error),
    #[error("The {0:?} helper needs an instance number")]
    MissingInstance(HelperKind),
}

/// The well-known bus name of a helper.
///
/// Multiple application instances running from different working directories get different
/// names so that calls always reach the helper started by the same instance.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn derive(
        kind: HelperKind,
        working_dir: &Path,
        instance: Option<u32>,
    ) -> Result<Self, ServiceNameError> {
        let hash = working_dir_hash(working_dir);
        let name = match kind {
            HelperKind::Main => format!("{PREFIX}.GtkIntegration-{hash}"),
            HelperKind::Base => format!("{PREFIX}.BaseGtkIntegration-{hash}"),
            HelperKind::Webview => {
                let instance = instance.ok_or(ServiceNameError::MissingInstance(kind))?;
                format!("{PREFIX}.GtkIntegration.WebviewHelper-{hash}-{instance}")
            }
        };
        Ok(Self(name))
    }

    /// Derives the name from `dir`, or the current directory if `dir` is `None`.
    pub fn for_dir(
        kind: HelperKind,
        dir: Option<&Path>,
        instance: Option<u32>,
    ) -> Result<Self, ServiceNameError> {
        let dir = match dir {
            Some(dir) => dir.canonicalize(),
            None => env::current_dir().and_then(|d| d.canonicalize()),
        };
        let dir = dir.map_err(ServiceNameError::WorkingDir)?;
        Self::derive(kind, &dir, instance)
    }

    /// Wraps a name received on the command line of the helper.
    pub fn from_raw(name: String) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn working_dir_hash(dir: &Path) -> String {
    let hex = blake3::hash(dir.as_os_str().as_bytes()).to_hex();
    hex.as_str()[..HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_depend_on_kind_and_directory() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let main_a = ServiceName::derive(HelperKind::Main, a.path(), None).unwrap();
        let main_a2 = ServiceName::derive(HelperKind::Main, a.path(), None).unwrap();
        let main_b = ServiceName::derive(HelperKind::Main, b.path(), None).unwrap();
        let base_a = ServiceName::derive(HelperKind::Base, a.path(), None).unwrap();
        assert_eq!(main_a, main_a2);
        assert_ne!(main_a, main_b);
        assert_ne!(main_a, base_a);
    }

    #[test]
    fn name_layout() {
        let dir = Path::new("/home/user/app");
        let hash = working_dir_hash(dir);
        assert_eq!(hash.len(), HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let main = ServiceName::derive(HelperKind::Main, dir, None).unwrap();
        assert_eq!(
            main.as_str(),
            format!("dev.gtk_integration.GtkIntegration-{hash}")
        );
        let base = ServiceName::derive(HelperKind::Base, dir, None).unwrap();
        assert_eq!(
            base.as_str(),
            format!("dev.gtk_integration.BaseGtkIntegration-{hash}")
        );
        let webview = ServiceName::derive(HelperKind::Webview, dir, Some(3)).unwrap();
        assert_eq!(
            webview.to_string(),
            format!("dev.gtk_integration.GtkIntegration.WebviewHelper-{hash}-3")
        );
    }

    #[test]
    fn relative_and_absolute_dirs_agree() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let direct = ServiceName::for_dir(HelperKind::Main, Some(&nested), None).unwrap();
        let dotted = ServiceName::for_dir(
            HelperKind::Main,
            Some(&nested.join("..").join("nested")),
            None,
        )
        .unwrap();
        assert_eq!(direct, dotted);
    }

    #[test]
    fn missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = ServiceName::for_dir(HelperKind::Main, Some(&dir.path().join("gone")), None);
        assert!(matches!(res, Err(ServiceNameError::WorkingDir(_))));
    }

    #[test]
    fn webview_requires_instance() {
        let res = ServiceName::derive(HelperKind::Webview, Path::new("/"), None);
        assert!(matches!(
            res,
            Err(ServiceNameError::MissingInstance(HelperKind::Webview))
        ));
    }

    #[test]
    fn names_are_valid_bus_names() {
        let name = ServiceName::derive(HelperKind::Main, Path::new("/srv"), None).unwrap();
        assert!(zbus::names::WellKnownName::try_from(name.as_str()).is_ok());
        let name = ServiceName::derive(HelperKind::Webview, Path::new("/srv"), Some(0)).unwrap();
        assert!(zbus::names::WellKnownName::try_from(name.as_str()).is_ok());
    }

    #[test]
    fn kind_args_parse_back() {
        for kind in [HelperKind::Main, HelperKind::Base, HelperKind::Webview] {
            assert_eq!(HelperKind::from_str(kind.as_arg(), false), Ok(kind));
        }
    }

    #[test]
    fn launchable_kinds() {
        assert!(HelperKind::Main.is_launchable());
        assert!(HelperKind::Base.is_launchable());
        assert!(!HelperKind::Webview.is_launchable());
    }
}
