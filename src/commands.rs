//! The command loop: a thin adapter between input lines and the
//! orchestrator's control surface.

use upstack::{Orchestrator, Status};

/// Process one input line. Multiple commands can be separated by '&'; they
/// execute sequentially. Returns true when the user asked to quit.
pub async fn process_line(orchestrator: &Orchestrator, line: &str) -> bool {
    for command in line.trim().split('&') {
        if process_command(orchestrator, command).await {
            return true;
        }
    }
    false
}

async fn process_command(orchestrator: &Orchestrator, command: &str) -> bool {
    let command = command.trim();
    match command.to_lowercase().as_str() {
        "" => return false,
        "q" | "quit" | "exit" => return true,
        "h" | "help" => {
            print_help();
            return false;
        }
        _ => {}
    }
    println!("Processing command: \"{}\"", command);

    if let Some(name) = strip_group_command(command, "start") {
        match orchestrator.start_group(name).await {
            Ok(()) => println!("Group \"{}\" is up", name),
            Err(e) => eprintln!("{}", e),
        }
    } else if let Some(name) = strip_group_command(command, "stop") {
        if let Err(e) = orchestrator.stop_group(name).await {
            eprintln!("{}", e);
        }
    } else if let Some(name) = command.strip_prefix("status") {
        print_status(orchestrator, name.trim());
    } else if let Some(name) = command.strip_prefix("start ") {
        if let Err(e) = orchestrator.start_service(name.trim()) {
            eprintln!("{}", e);
        }
    } else if let Some(name) = command.strip_prefix("stop ") {
        if let Err(e) = orchestrator.stop_service(name.trim()).await {
            eprintln!("{}", e);
        }
    } else {
        println!(
            "Command \"{}\" was not understood. Type \"help\" or \"h\" to print help",
            command
        );
    }
    false
}

/// Accept both "start group <name>" and "group start <name>".
fn strip_group_command<'a>(command: &'a str, verb: &str) -> Option<&'a str> {
    let spaced = format!("{} group ", verb);
    let flipped = format!("group {} ", verb);
    command
        .strip_prefix(&spaced)
        .or_else(|| command.strip_prefix(&flipped))
        .map(str::trim)
}

fn print_status(orchestrator: &Orchestrator, name: &str) {
    let name = if name.is_empty() { None } else { Some(name) };
    match orchestrator.status(name) {
        Ok(snapshots) => {
            if snapshots.is_empty() {
                println!("No services have been loaded");
                return;
            }
            let width = snapshots
                .iter()
                .map(|s| s.service.len())
                .max()
                .unwrap_or(30);
            for snapshot in snapshots {
                match (snapshot.status, snapshot.pid) {
                    (Status::Started, Some(pid)) => println!(
                        "{:width$}  {:<10}  pid {}",
                        snapshot.service, snapshot.status.to_string(), pid
                    ),
                    _ => println!(
                        "{:width$}  {:<10}",
                        snapshot.service,
                        snapshot.status.to_string()
                    ),
                }
            }
        }
        Err(e) => eprintln!("{}", e),
    }
}

pub fn print_help() {
    println!(
        "Available commands:\n\
         - (start group|group start) <group name>. Start a group and its dependencies.\n\
         - (stop group|group stop) <group name>. Stop every service of a group.\n\
         - (start|stop) <service name>. Start or stop a single service.\n\
         - status [<service name>]. Show the status of one service,\n\
           or all loaded services if no name is given.\n\
         - (quit|exit|q). Exit; all started processes are stopped first.\n\
         - (help|h). Print this help.\n\
         \n\
         Multiple commands can be separated by '&'.\n\
         Example: \"start group web & status\". They execute sequentially."
    );
}
