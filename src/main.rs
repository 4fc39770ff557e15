use error_reporter::Report;

mod cli;
mod display;
mod gui;
mod integration;
mod logging;
mod parent;
mod service;

rust_i18n::i18n!();

fn main() -> std::process::ExitCode {
    cli::main()
}

fn init_i18n() {
    let current = match current_locale::current_locale() {
        Ok(c) => c,
        Err(e) => {
            log::debug!("Could not retrieve current locale: {}", Report::new(e));
            return;
        }
    };
    let tags = match language_tags::LanguageTag::parse(&current) {
        Ok(t) => t,
        Err(e) => {
            log::debug!("Could not parse current locale: {}", Report::new(e));
            return;
        }
    };
    rust_i18n::set_locale(tags.primary_language());
}
