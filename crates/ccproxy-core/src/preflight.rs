//! Startup preflight: single-instance guarantee, orphan cleanup and port
//! liveness, all before any managed child starts.
//!
//! Process discovery goes through `/proc`; signalling through nix. The
//! port check parses `/proc/net/tcp{,6}` and falls back to a bind probe
//! when `/proc` is unreadable.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// `(binary, marker)` pairs that identify processes we manage.
const MANAGED_PATTERNS: &[(&str, &str)] = &[
    ("litellm", "ccproxy/config.yaml"),
    ("mitmdump", "ccproxy/mitm"),
    ("ccproxy", "--config-dir"),
];

/// Pid files checked in phase 1, relative to the config dir.
const PID_FILES: &[(&str, &str)] = &[
    ("dispatcher", "dispatcher.pid"),
    ("mitm reverse", "mitm-reverse.pid"),
    ("mitm forward", "mitm-forward.pid"),
];

pub type PreflightResult<T> = Result<T, PreflightError>;

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("{name} is already running (pid {pid}); stop it first")]
    AlreadyRunning { name: String, pid: i32 },
    #[error("port {port} is occupied by another process (pid {pid}: {process})")]
    PortInUse { port: u16, pid: i32, process: String },
    #[error("port {port} is already in use (could not identify the process)")]
    PortUnavailable { port: u16 },
    #[error("failed to free port {port} (pid {pid} still holding it)")]
    PortNotFreed { port: u16, pid: i32 },
}

pub fn is_managed_cmdline(cmdline: &str) -> bool {
    MANAGED_PATTERNS
        .iter()
        .any(|(binary, marker)| cmdline.contains(binary) && cmdline.contains(marker))
}

pub fn read_proc_cmdline(pid: i32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let text = raw
        .split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    Some(text.trim().to_string())
}

fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Read a pid file and report liveness. Stale files (dead pid, garbage)
/// are removed.
pub fn is_process_running(pid_file: &Path) -> (bool, Option<i32>) {
    let Ok(raw) = std::fs::read_to_string(pid_file) else {
        return (false, None);
    };
    let Ok(pid) = raw.trim().parse::<i32>() else {
        let _ = std::fs::remove_file(pid_file);
        return (false, None);
    };
    if pid_alive(pid) {
        (true, Some(pid))
    } else {
        debug!(pid, path = %pid_file.display(), "removing stale pid file");
        let _ = std::fs::remove_file(pid_file);
        (false, Some(pid))
    }
}

pub fn write_pid_file(pid_file: &Path, pid: u32) -> std::io::Result<()> {
    std::fs::write(pid_file, format!("{pid}\n"))
}

pub fn remove_pid_file(pid_file: &Path) {
    let _ = std::fs::remove_file(pid_file);
}

/// Socket inode → owning pid, from `/proc/<pid>/fd` symlinks.
fn find_inode_pids() -> HashMap<u64, i32> {
    let mut inode_to_pid = HashMap::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return inode_to_pid;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(target) = std::fs::read_link(fd.path()) else {
                continue;
            };
            if let Some(inode) = parse_socket_inode(&target) {
                inode_to_pid.insert(inode, pid);
            }
        }
    }
    inode_to_pid
}

fn parse_socket_inode(target: &Path) -> Option<u64> {
    let text = target.to_str()?;
    text.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Which process listens on a port.
///
/// Returns `(None, None)` when the port is free, `(Some(pid), snippet)`
/// when identified, and `(Some(-1), ..)` when the port is bound but the
/// holder could not be resolved.
pub fn get_port_pid(port: u16, host: &str) -> (Option<i32>, Option<String>) {
    let hex_port = format!("{port:04X}");
    let v4_addrs: HashSet<&str> = if host == "0.0.0.0" {
        ["00000000"].into_iter().collect()
    } else {
        ["0100007F", "00000000"].into_iter().collect()
    };

    let mut listening_inodes: HashSet<u64> = HashSet::new();
    for tcp_path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = std::fs::read_to_string(tcp_path) else {
            continue;
        };
        for line in contents.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            // state 0A = LISTEN
            if fields[3] != "0A" {
                continue;
            }
            let Some((addr_hex, port_hex)) = fields[1].split_once(':') else {
                continue;
            };
            if port_hex != hex_port {
                continue;
            }
            let matches = if tcp_path.ends_with('6') {
                // v4-mapped loopback or the v6 wildcard
                addr_hex == "00000000000000000000FFFF0100007F"
                    || addr_hex == "00000000000000000000000000000000"
            } else {
                v4_addrs.contains(addr_hex)
            };
            if matches
                && let Ok(inode) = fields[9].parse::<u64>()
            {
                listening_inodes.insert(inode);
            }
        }
    }

    if listening_inodes.is_empty() {
        // Double-check with a bind probe.
        return match std::net::TcpListener::bind((host, port)) {
            Ok(_) => (None, None),
            Err(_) => (Some(-1), Some("unknown".to_string())),
        };
    }

    let inode_to_pid = find_inode_pids();
    for inode in listening_inodes {
        if let Some(&pid) = inode_to_pid.get(&inode) {
            let snippet = read_proc_cmdline(pid).map(|c| truncate(&c, 80));
            return (Some(pid), snippet);
        }
    }

    (Some(-1), Some("unknown".to_string()))
}

/// Scan `/proc` for managed processes, excluding self and parent.
pub fn find_managed_processes(exclude_pid: Option<i32>) -> Vec<(i32, String)> {
    let mut exclude: HashSet<i32> = HashSet::new();
    if let Some(pid) = exclude_pid {
        exclude.insert(pid);
    }
    exclude.insert(nix::unistd::getppid().as_raw());

    let mut results = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return results;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        if exclude.contains(&pid) {
            continue;
        }
        if let Some(cmdline) = read_proc_cmdline(pid)
            && !cmdline.is_empty()
            && is_managed_cmdline(&cmdline)
        {
            results.push((pid, cmdline));
        }
    }
    results
}

/// SIGTERM, short grace, then SIGKILL for whatever survived.
pub fn kill_stale_processes(processes: &[(i32, String)]) -> usize {
    let mut killed = 0;
    for (pid, cmdline) in processes {
        let snippet = truncate(cmdline, 80);
        warn!(pid, cmdline = %snippet, "killing stale managed process");
        let pid = Pid::from_raw(*pid);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {
                std::thread::sleep(Duration::from_millis(300));
                if kill(pid, None).is_ok() {
                    let _ = kill(pid, Signal::SIGKILL);
                }
                killed += 1;
            }
            Err(nix::errno::Errno::ESRCH) => killed += 1,
            Err(err) => warn!(pid = pid.as_raw(), error = %err, "failed to kill process"),
        }
    }
    killed
}

/// Phase 1: pid-file liveness. Phase 2: orphan scan. Phase 3: required
/// ports are free (stale managed holders are evicted, foreign holders
/// are fatal).
pub fn run_preflight(config_dir: &Path, ports: &[u16]) -> PreflightResult<()> {
    debug!("running preflight checks");

    for (name, file_name) in PID_FILES {
        let path: PathBuf = config_dir.join(file_name);
        let (running, pid) = is_process_running(&path);
        if running {
            return Err(PreflightError::AlreadyRunning {
                name: name.to_string(),
                pid: pid.unwrap_or(-1),
            });
        }
    }

    let orphans = find_managed_processes(Some(std::process::id() as i32));
    if !orphans.is_empty() {
        warn!(count = orphans.len(), "found orphaned managed processes");
        if kill_stale_processes(&orphans) > 0 {
            std::thread::sleep(Duration::from_millis(500));
        }
    }

    for &port in ports {
        let (pid, snippet) = get_port_pid(port, "127.0.0.1");
        let Some(pid) = pid else {
            debug!(port, "port is available");
            continue;
        };
        if pid == -1 {
            return Err(PreflightError::PortUnavailable { port });
        }

        let cmdline = read_proc_cmdline(pid);
        if let Some(cmdline) = cmdline.filter(|c| is_managed_cmdline(c)) {
            warn!(port, pid, "port held by stale managed process");
            kill_stale_processes(&[(pid, cmdline)]);
            std::thread::sleep(Duration::from_millis(300));
            if get_port_pid(port, "127.0.0.1").0.is_some() {
                return Err(PreflightError::PortNotFreed { port, pid });
            }
        } else {
            return Err(PreflightError::PortInUse {
                port,
                pid,
                process: snippet.unwrap_or_else(|| "unknown".to_string()),
            });
        }
    }

    debug!("preflight checks passed");
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_cmdline_matching() {
        assert!(is_managed_cmdline(
            "/usr/bin/python litellm --config /home/u/.ccproxy/config.yaml"
        ));
        assert!(is_managed_cmdline(
            "mitmdump -s /opt/ccproxy/mitm/script.py --mode reverse"
        ));
        assert!(!is_managed_cmdline("litellm --config /etc/other/config.yaml"));
        assert!(!is_managed_cmdline("nginx -g daemon off;"));
    }

    #[test]
    fn free_port_reports_none() {
        // Grab an ephemeral port, then release it.
        let port = {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let (pid, snippet) = get_port_pid(port, "127.0.0.1");
        assert_eq!(pid, None);
        assert_eq!(snippet, None);
    }

    #[test]
    fn bound_port_reports_a_holder() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let (pid, _) = get_port_pid(port, "127.0.0.1");
        let pid = pid.expect("port should be seen as bound");
        // Either resolved to us or unidentifiable in a restricted /proc.
        assert!(pid == std::process::id() as i32 || pid == -1);
    }

    #[test]
    fn own_cmdline_is_readable() {
        let cmdline = read_proc_cmdline(std::process::id() as i32).unwrap();
        assert!(!cmdline.is_empty());
    }

    #[test]
    fn pid_file_lifecycle() {
        let dir = std::env::temp_dir().join(format!("ccproxy-preflight-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pid_file = dir.join("dispatcher.pid");

        // Live pid: reported running, file kept.
        write_pid_file(&pid_file, std::process::id()).unwrap();
        let (running, pid) = is_process_running(&pid_file);
        assert!(running);
        assert_eq!(pid, Some(std::process::id() as i32));
        assert!(pid_file.exists());

        // Garbage: removed, not running.
        std::fs::write(&pid_file, "not-a-pid").unwrap();
        let (running, _) = is_process_running(&pid_file);
        assert!(!running);
        assert!(!pid_file.exists());

        // Dead pid: removed, not running.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        write_pid_file(&pid_file, dead_pid).unwrap();
        let (running, _) = is_process_running(&pid_file);
        assert!(!running);
        assert!(!pid_file.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn preflight_passes_on_free_ports() {
        let dir = std::env::temp_dir().join(format!("ccproxy-preflight-ok-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let port = {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        run_preflight(&dir, &[port]).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn preflight_rejects_running_pid_file() {
        let dir =
            std::env::temp_dir().join(format!("ccproxy-preflight-live-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        write_pid_file(&dir.join("dispatcher.pid"), std::process::id()).unwrap();
        let err = run_preflight(&dir, &[]).unwrap_err();
        assert!(matches!(err, PreflightError::AlreadyRunning { .. }));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
