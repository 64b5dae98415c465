use anyhow::Result;
use log::debug;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Human-readable duration for log lines, e.g. `4m 05s` or `12.3s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Opener command for `os` (a `std::env::consts::OS` value). The URL is always
/// a single argument; `cmd /C start` would split it at `&`.
fn browser_command(os: &str, url: &str) -> Command {
    let mut command = match os {
        "macos" => Command::new("open"),
        "windows" => {
            let mut cmd = Command::new("rundll32");
            cmd.arg("url.dll,FileProtocolHandler");
            cmd
        }
        _ => Command::new("xdg-open"),
    };
    command.arg(url);
    command
}

/// Hands `url` to the desktop's default browser. Failure is not fatal; the
/// caller always prints the URL as well.
pub fn open_in_browser(url: &str) -> Result<()> {
    let child = browser_command(std::env::consts::OS, url)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    debug!("Spawned browser opener (pid {})", child.id());
    Ok(())
}
