use {
    crate::{
        display::{parent_window_token, ActiveWindow, DisplayBackend},
        gui::Ui,
        integration::Server,
        logging::{self, Role},
        parent::{self, OpenWith},
        service::{HelperKind, ServiceName},
    },
    clap::{Args, Parser, Subcommand},
    error_reporter::Report,
    std::{num::ParseIntError, path::PathBuf, process::ExitCode},
};

/// Shows GTK dialogs on behalf of another process.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show an application chooser for a file.
    OpenWith(OpenWithArgs),
    /// Serve GTK operations for a parent process. Launched by the parent.
    Helper(HelperArgs),
    /// Print the bus name of a helper.
    ServiceName(ServiceNameArgs),
}

impl Command {
    fn role(&self) -> Role {
        match self {
            Command::Helper(_) => Role::Helper,
            Command::OpenWith(_) | Command::ServiceName(_) => Role::Parent,
        }
    }
}

#[derive(Args, Debug)]
struct OpenWithArgs {
    /// Show the dialog in this process instead of a helper process.
    #[clap(long)]
    local: bool,
    /// The directory the helper name is derived from. Defaults to the current directory.
    #[clap(long)]
    working_dir: Option<PathBuf>,
    /// Comma-separated GDK backends. Defaults to the running display backend first.
    #[clap(long)]
    allowed_backends: Option<String>,
    /// xdg-foreign handle of the window the dialog belongs to.
    #[clap(long)]
    wayland_handle: Option<String>,
    /// X11 id of the window the dialog belongs to, in hex.
    #[clap(long, value_parser = parse_hex)]
    x11_window: Option<u64>,
    /// The file to open. A path or a file:// URI.
    file: String,
}

#[derive(Args, Debug)]
struct HelperArgs {
    #[clap(long, value_enum, default_value_t = HelperKind::Main)]
    kind: HelperKind,
    /// The unique bus name of the parent. Calls from other processes are rejected.
    parent: String,
    /// The bus name to serve under.
    service: String,
}

#[derive(Args, Debug)]
struct ServiceNameArgs {
    #[clap(long, value_enum, default_value_t = HelperKind::Main)]
    kind: HelperKind,
    #[clap(long)]
    working_dir: Option<PathBuf>,
    /// Instance number of a webview helper.
    #[clap(long)]
    instance: Option<u32>,
}

fn parse_hex(s: &str) -> Result<u64, ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

pub fn main() -> ExitCode {
    let args = Cli::parse();
    logging::init(args.command.role());
    crate::init_i18n();
    match args.command {
        Command::OpenWith(args) => open_with(args),
        Command::Helper(args) => helper(args),
        Command::ServiceName(args) => service_name(args),
    }
}

fn open_with(args: OpenWithArgs) -> ExitCode {
    let filepath = match parent::resolve_file(&args.file) {
        Ok(f) => f,
        Err(e) => {
            log::error!("Invalid file argument: {}", Report::new(e));
            return ExitCode::FAILURE;
        }
    };
    let service = match ServiceName::for_dir(HelperKind::Main, args.working_dir.as_deref(), None)
    {
        Ok(s) => s,
        Err(e) => {
            log::error!("Could not derive the helper name: {}", Report::new(e));
            return ExitCode::FAILURE;
        }
    };
    let backend = DisplayBackend::detect();
    let window = (args.wayland_handle.is_some() || args.x11_window.is_some()).then(|| {
        ActiveWindow {
            wayland_handle: args.wayland_handle,
            x11_window: args.x11_window,
        }
    });
    let open_with = OpenWith {
        service,
        allowed_backends: args
            .allowed_backends
            .unwrap_or_else(|| backend.allowed_backends().to_string()),
        parent_window: parent_window_token(backend, window.as_ref()),
        filepath,
    };
    let handled = match args.local {
        true => open_with.run_local(),
        false => open_with.run_remote(),
    };
    match handled {
        true => ExitCode::SUCCESS,
        false => ExitCode::FAILURE,
    }
}

fn helper(args: HelperArgs) -> ExitCode {
    if !args.kind.is_launchable() {
        log::error!("{:?} helpers are not served by this binary", args.kind);
        return ExitCode::FAILURE;
    }
    let ui = Ui::new();
    let mut server = match Server::register(&ui, args.parent, ServiceName::from_raw(args.service))
    {
        Ok(s) => s,
        Err(e) => {
            log::error!("Could not register the integration: {}", Report::new(e));
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = server.run(&ui) {
        log::error!("The integration failed: {}", Report::new(e));
        return ExitCode::FAILURE;
    }
    log::info!("Helper stopped in state {:?}", server.state());
    ExitCode::SUCCESS
}

fn service_name(args: ServiceNameArgs) -> ExitCode {
    match ServiceName::for_dir(args.kind, args.working_dir.as_deref(), args.instance) {
        Ok(name) => {
            println!("{name}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Could not derive the service name: {}", Report::new(e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn helper_arguments_are_positional() {
        let cli = Cli::try_parse_from([
            "gtk-integration",
            "helper",
            "--kind",
            "base",
            ":1.12",
            "dev.gtk_integration.BaseGtkIntegration-00",
        ])
        .unwrap();
        assert_eq!(cli.command.role(), Role::Helper);
        let Command::Helper(args) = cli.command else {
            panic!("not a helper command");
        };
        assert_eq!(args.kind, HelperKind::Base);
        assert_eq!(args.parent, ":1.12");
        assert_eq!(args.service, "dev.gtk_integration.BaseGtkIntegration-00");
    }

    #[test]
    fn open_with_options() {
        let cli = Cli::try_parse_from([
            "gtk-integration",
            "open-with",
            "--x11-window",
            "0x3a0000f",
            "/tmp/a.bin",
        ])
        .unwrap();
        assert_eq!(cli.command.role(), Role::Parent);
        let Command::OpenWith(args) = cli.command else {
            panic!("not an open-with command");
        };
        assert!(!args.local);
        assert_eq!(args.x11_window, Some(0x3a0000f));
        assert_eq!(args.file, "/tmp/a.bin");
    }

    #[test]
    fn hex_window_ids() {
        assert_eq!(parse_hex("1f"), Ok(0x1f));
        assert_eq!(parse_hex("0x1f"), Ok(0x1f));
        assert!(parse_hex("xyz").is_err());
    }
}
