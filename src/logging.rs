use std::fmt::Display;

use colored::Colorize;
use log::Level;

/// External crates only need to log warnings and errors
const ALLOWED_EXTERNAL_LEVELS: [Level; 2] = [Level::Warn, Level::Error];
const ALLOWED_LEVELS: [Level; 3] = [Level::Info, Level::Warn, Level::Error];

pub fn init_logger() {
    let result = fern::Dispatch::new()
        .format(move |out, message, record| {
            let target = Target::from_str(record.target());
            let now = chrono::Local::now();

            out.finish(format_args!(
                "{:^5} {} {:^8} {}",
                level_to_string(&record.level()),
                now.format("%H:%M:%S").to_string().bright_black(),
                target,
                message
            ))
        })
        .filter(|meta| {
            let target = Target::from_str(meta.target());

            let is_allowed = ALLOWED_LEVELS.contains(&meta.level());
            let is_severe = ALLOWED_EXTERNAL_LEVELS.contains(&meta.level());

            target.is_local() && is_allowed || is_severe
        })
        .chain(std::io::stdout())
        .apply();

    if let Err(e) = result {
        eprintln!("Could not initialize logging: {e}");
    }
}

#[derive(Debug, PartialEq)]
enum Target {
    External(String),
    Launcher,
    Server,
    Collab,
    Hub,
    Reaper,
}

impl Target {
    fn from_str(str: &str) -> Self {
        let mut split = str.split("::");
        let module = split.next().unwrap_or_default();

        match (module, split.next()) {
            ("wewatch", _) => Self::Launcher,
            ("wewatch_server", _) => Self::Server,
            ("wewatch_collab", Some("hub")) => Self::Hub,
            ("wewatch_collab", Some("reaper")) => Self::Reaper,
            ("wewatch_collab", _) => Self::Collab,
            (other, _) => Target::External(other.to_string()),
        }
    }

    fn is_local(&self) -> bool {
        !matches!(self, Self::External(_))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Target::External(x) => x.as_str().clear(),
            Target::Launcher => "WEWATCH".bright_cyan(),
            Target::Server => "SERVER".bright_green(),
            Target::Collab => "COLLAB".bright_purple(),
            Target::Hub => "HUB".blue(),
            Target::Reaper => "REAPER".yellow(),
        };

        Display::fmt(&result, f)
    }
}

fn level_to_string(level: &Level) -> String {
    match level {
        Level::Error => " ERR ".black().on_red().bold().to_string(),
        Level::Warn => " WRN ".black().on_yellow().bold().to_string(),
        Level::Info => " INF ".black().on_blue().bold().to_string(),
        Level::Debug => " DBG ".white().on_black().to_string(),
        Level::Trace => " TRC ".to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::Target;

    #[test]
    fn targets_are_read_from_module_paths() {
        assert_eq!(Target::from_str("wewatch_server::ws"), Target::Server);
        assert_eq!(Target::from_str("wewatch_collab::hub"), Target::Hub);
        assert_eq!(Target::from_str("wewatch_collab::reaper"), Target::Reaper);
        assert_eq!(Target::from_str("wewatch_collab::rooms::chat"), Target::Collab);
        assert_eq!(
            Target::from_str("sqlx::query"),
            Target::External("sqlx".to_string())
        );
        assert!(!Target::from_str("hyper").is_local());
    }
}
