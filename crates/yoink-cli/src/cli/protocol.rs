//! Control socket line protocol. One request per line, one reply line each;
//! `progress` replies with a stream of JSON lines instead.

use yoink_core::job::{ClientId, JobId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello(ClientId),
    Heartbeat(ClientId),
    Fetch {
        client: ClientId,
        url: String,
        audio: bool,
        /// Submit without an owner, so the job outlives the client's heartbeats.
        detached: bool,
    },
    Cancel(JobId),
    FinishEarly(JobId),
    Status,
    Progress(JobId),
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| "empty request".to_string())?;
        let mut arg = |what: &str| {
            parts
                .next()
                .map(str::to_string)
                .ok_or_else(|| format!("{} requires a {}", verb, what))
        };
        let req = match verb {
            "hello" => Request::Hello(ClientId::new(arg("client id")?)),
            "heartbeat" => Request::Heartbeat(ClientId::new(arg("client id")?)),
            "fetch" => {
                let client = ClientId::new(arg("client id")?);
                let url = arg("url")?;
                let (mut audio, mut detached) = (false, false);
                for option in parts.by_ref() {
                    match option {
                        "audio" => audio = true,
                        "detached" => detached = true,
                        other => return Err(format!("unexpected fetch option: {}", other)),
                    }
                }
                Request::Fetch {
                    client,
                    url,
                    audio,
                    detached,
                }
            }
            "cancel" => Request::Cancel(JobId::new(arg("job id")?)),
            "finish-early" => Request::FinishEarly(JobId::new(arg("job id")?)),
            "status" => Request::Status,
            "progress" => Request::Progress(JobId::new(arg("job id")?)),
            other => return Err(format!("unknown command: {}", other)),
        };
        Ok(req)
    }

    pub fn to_line(&self) -> String {
        match self {
            Request::Hello(c) => format!("hello {}\n", c),
            Request::Heartbeat(c) => format!("heartbeat {}\n", c),
            Request::Fetch {
                client,
                url,
                audio,
                detached,
            } => {
                let mut line = format!("fetch {} {}", client, url);
                if *audio {
                    line.push_str(" audio");
                }
                if *detached {
                    line.push_str(" detached");
                }
                line.push('\n');
                line
            }
            Request::Cancel(j) => format!("cancel {}\n", j),
            Request::FinishEarly(j) => format!("finish-early {}\n", j),
            Request::Status => "status\n".to_string(),
            Request::Progress(j) => format!("progress {}\n", j),
        }
    }
}

pub const OK: &str = "ok";
pub const UNKNOWN_CLIENT: &str = "unknown-client";
pub const NOT_FOUND: &str = "not-found";
pub const REFUSED: &str = "refused";
/// Prefix of the error a `progress` request gets for a job that is not live.
pub const NO_LIVE_JOB: &str = "no live job";

pub fn job_reply(job: &JobId) -> String {
    format!("job {}", job)
}

pub fn error_reply(message: &str) -> String {
    format!("error {}", message)
}

/// Split a reply into `Ok(payload)` or `Err(message)` for `error ...` lines.
pub fn check_reply(reply: &str) -> Result<&str, String> {
    match reply.strip_prefix("error ") {
        Some(msg) => Err(msg.to_string()),
        None => Ok(reply),
    }
}
