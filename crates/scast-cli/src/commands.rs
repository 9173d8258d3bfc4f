use scast_protocol::{Origin, Request, Response, StatusReport};

use crate::client::CastClient;

/// Start the daemon.
pub async fn server_start(foreground: bool) -> anyhow::Result<()> {
    if foreground {
        let status = tokio::process::Command::new("scastd").status().await?;
        std::process::exit(status.code().unwrap_or(1));
    } else {
        let child = std::process::Command::new("scastd")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .stdin(std::process::Stdio::null())
            .spawn()?;

        println!("scast daemon started (pid: {})", child.id());
        Ok(())
    }
}

/// Stop the daemon.
pub async fn server_stop() -> anyhow::Result<()> {
    let pid_path = scast_protocol::paths::pid_file_path();
    if pid_path.exists() {
        let pid_str = std::fs::read_to_string(&pid_path)?;
        let pid: i32 = pid_str.trim().parse()?;
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let _ = std::fs::remove_file(&pid_path);
        println!("scast daemon stopped (pid: {pid})");
    } else {
        println!("scast daemon is not running");
    }
    Ok(())
}

/// Check daemon status.
pub async fn server_status() -> anyhow::Result<()> {
    let pid_path = scast_protocol::paths::pid_file_path();
    if pid_path.exists() {
        let pid_str = std::fs::read_to_string(&pid_path)?;
        let pid: i32 = pid_str.trim().parse()?;
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        if alive {
            println!("scast daemon is running (pid: {pid})");
        } else {
            println!("scast daemon is not running (stale pid file)");
            let _ = std::fs::remove_file(&pid_path);
        }
    } else {
        println!("scast daemon is not running");
    }
    Ok(())
}

/// Request a display server start.
pub async fn start() -> anyhow::Result<()> {
    let mut client = CastClient::connect().await?;
    let req = Request::Start {
        origin: Origin::Local,
    };
    match client.request(&req).await? {
        Response::Ok { data: Some(data) } => {
            let report: StatusReport = serde_json::from_value(data)?;
            print_report(&report);
        }
        Response::Error { message, .. } => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
        _ => {}
    }
    Ok(())
}

/// Request a display server stop.
pub async fn stop() -> anyhow::Result<()> {
    let mut client = CastClient::connect().await?;
    let req = Request::Stop {
        origin: Origin::Local,
    };
    match client.request(&req).await? {
        Response::Ok { data: Some(data) } => {
            let report: StatusReport = serde_json::from_value(data)?;
            print_report(&report);
        }
        Response::Error { message, .. } => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
        _ => {}
    }
    Ok(())
}

/// Show the current session status.
pub async fn status() -> anyhow::Result<()> {
    let mut client = CastClient::connect().await?;
    match client.request(&Request::Status).await? {
        Response::Ok { data: Some(data) } => {
            let report: StatusReport = serde_json::from_value(data)?;
            print_report(&report);
        }
        Response::Error { message, .. } => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
        _ => {}
    }
    Ok(())
}

/// Stream status-change events to stdout as JSON lines.
pub async fn watch() -> anyhow::Result<()> {
    let mut client = CastClient::connect().await?;

    match client.request(&Request::Subscribe).await? {
        Response::Ok { .. } => {}
        Response::Error { message, .. } => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
        _ => {}
    }

    while let Some(resp) = client.read_line().await? {
        if let Response::Event(event) = resp {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!("Running:  {}", if report.running { "yes" } else { "no" });
    println!("State:    {}", report.state);
    println!(
        "Capture:  {}",
        if report.grant { "granted" } else { "not granted" }
    );
}
