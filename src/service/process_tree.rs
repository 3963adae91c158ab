//! Process tree enumeration and destruction.
//!
//! Services run shell commands, and shells fork. Signals and force-destroy
//! therefore target the whole descendant tree, post-order (children before
//! parents), so no orphan survives a stop. On non-POSIX hosts the signal
//! path degrades to a best-effort kill of the direct child.

use std::time::Duration;

/// Hard wait between the graceful destroy and the forcible one.
pub const DESTROY_GRACE: Duration = Duration::from_secs(3);

#[cfg(unix)]
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// All descendant pids of `root` plus `root` itself, post-order.
#[cfg(unix)]
pub fn descendant_pids(root: u32) -> Vec<u32> {
    let mut children: std::collections::HashMap<u32, Vec<u32>> = std::collections::HashMap::new();
    for (pid, ppid) in process_table() {
        children.entry(ppid).or_default().push(pid);
    }

    let mut pids = Vec::new();
    collect_postorder(root, &children, &mut pids);
    pids
}

#[cfg(unix)]
fn collect_postorder(
    pid: u32,
    children: &std::collections::HashMap<u32, Vec<u32>>,
    out: &mut Vec<u32>,
) {
    if let Some(kids) = children.get(&pid) {
        for kid in kids {
            collect_postorder(*kid, children, out);
        }
    }
    out.push(pid);
}

/// Snapshot of (pid, ppid) pairs for every live process.
#[cfg(target_os = "linux")]
fn process_table() -> Vec<(u32, u32)> {
    let mut table = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return table;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // comm is wrapped in parens and may contain anything; parse after
        // the last ')'
        let Some(close_paren) = stat.rfind(')') else {
            continue;
        };
        let mut fields = stat[close_paren + 2..].split_whitespace();
        let _state = fields.next();
        if let Some(ppid) = fields.next().and_then(|s| s.parse::<u32>().ok()) {
            table.push((pid, ppid));
        }
    }
    table
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_table() -> Vec<(u32, u32)> {
    let Ok(output) = std::process::Command::new("ps")
        .args(["-axo", "pid=,ppid="])
        .output()
    else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

/// Send `signal` to `root` and every descendant, children first.
#[cfg(unix)]
pub fn signal_tree(root: u32, signal: nix::sys::signal::Signal) {
    let pids = descendant_pids(root);
    tracing::debug!("Sending {} to: {:?}", signal, pids);
    for pid in pids {
        // the process may have exited between enumeration and delivery
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
    }
}

/// True while the kernel still knows `pid` (zombies included).
#[cfg(unix)]
pub fn alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn alive(_pid: u32) -> bool {
    false
}

/// Destroy the tree rooted at `pid` from outside: SIGTERM post-order, wait
/// up to [`DESTROY_GRACE`] for the root to disappear, then SIGKILL whatever
/// remains. A no-op once the root is gone.
#[cfg(unix)]
pub async fn destroy_tree(pid: u32) {
    if !alive(pid) {
        return;
    }
    signal_tree(pid, nix::sys::signal::Signal::SIGTERM);

    let deadline = tokio::time::Instant::now() + DESTROY_GRACE;
    while alive(pid) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if alive(pid) {
        tracing::warn!("Process {} survived SIGTERM, sending SIGKILL to its tree", pid);
        signal_tree(pid, nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
pub async fn destroy_tree(_pid: u32) {
    // without a tree-enumeration API there is nothing to do from outside;
    // the owning driver falls back to killing its direct child
}
