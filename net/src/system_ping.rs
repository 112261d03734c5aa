/*
Sends one ICMP echo by running the ping utility that ships with the host, which avoids
the agent needing raw socket privileges of its own. The exit status of ping decides the
outcome:
- 0 means a reply was received and the round trip time is parsed from stdout
- 1 means the request was sent but nothing came back
- anything else (unknown host, missing permissions) is a transport failure
*/

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use tokio::{process::Command, time};

use crate::{
    data_types::RoundTripMillis,
    echo::{EchoError, EchoReply, EchoResult, EchoTransport},
};

lazy_static! {
    static ref ROUND_TRIP_TIME: Regex = Regex::new(r"time([=<])\s*([0-9]+(?:\.[0-9]+)?)\s*ms").unwrap();
}

const DEFAULT_PROGRAM: &str = "ping";

// Extra time allowed for the child process to start and exit on top of the echo timeout
const PROCESS_GRACE: Duration = Duration::from_secs(2);

pub struct SystemPing {
    program: String,
    timeout: Duration,
}

impl SystemPing {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program(DEFAULT_PROGRAM, timeout)
    }

    pub fn with_program(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_owned(),
            timeout,
        }
    }

    fn timeout_secs(self: &Self) -> u64 {
        // ping only accepts whole seconds and treats 0 as "wait forever"
        self.timeout.as_secs().max(1)
    }
}

#[async_trait]
impl EchoTransport for SystemPing {
    async fn echo(self: &Self, address: &str) -> EchoResult {
        if address.trim().is_empty() || address.starts_with('-') {
            return Err(EchoError::InvalidAddress {
                address: address.to_owned(),
            });
        }

        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(self.timeout_secs().to_string())
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = Duration::from_secs(self.timeout_secs()) + PROCESS_GRACE;
        let output = match time::timeout(limit, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EchoError::Transport {
                    msg: format!("failed to run {}: {e}", self.program),
                })
            }
            Err(_) => {
                warn!("SystemPing: {} did not exit within {limit:?} for {address}", self.program);
                return Ok(EchoReply::failed(0));
            }
        };

        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let round_trip_time = parse_round_trip_time(&stdout).unwrap_or_else(|| {
                    debug!("SystemPing: no round trip time in output for {address}");
                    0
                });
                Ok(EchoReply::success(round_trip_time))
            }
            Some(1) => Ok(EchoReply::failed(0)),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(EchoError::Transport {
                    msg: format!(
                        "{} exited with {} for {address}: {}",
                        self.program,
                        code.map_or("signal".to_owned(), |c| c.to_string()),
                        stderr.trim()
                    ),
                })
            }
        }
    }
}

/// Extracts the round trip time from ping output, truncated to whole milliseconds
pub fn parse_round_trip_time(output: &str) -> Option<RoundTripMillis> {
    let captures = ROUND_TRIP_TIME.captures(output)?;
    let millis: f64 = captures.get(2)?.as_str().parse().ok()?;
    match captures.get(1)?.as_str() {
        // "time<1ms" is strictly below the bound, so the whole milliseconds are one less
        "<" => Some((millis.ceil() as RoundTripMillis).saturating_sub(1)),
        _ => Some(millis.trunc() as RoundTripMillis),
    }
}
