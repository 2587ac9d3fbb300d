//! Channel endpoints inherited from the parent process.
//!
//! The parent opens two anonymous pipes before spawning us and passes the
//! descriptor numbers through the environment. We wrap them into
//! `interprocess` unnamed pipe halves so the rest of the crate only sees
//! `Read`/`Write`.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use anyhow::{Result, bail};
use interprocess::unnamed_pipe::{Recver, Sender};

/// Both ends handed to us by the parent.
pub struct Endpoints {
    /// Configuration and commands, parent to child.
    pub conf: Recver,
    /// Status and media, child to parent.
    pub video: Sender,
}

impl Endpoints {
    /// Takes ownership of the two inherited descriptors.
    ///
    /// The descriptors must be open and owned by nobody else in this process;
    /// they are closed when the endpoints are dropped.
    pub fn from_raw_fds(conf_fd: RawFd, video_fd: RawFd) -> Result<Self> {
        if conf_fd < 0 || video_fd < 0 {
            bail!("invalid pipe descriptors ({conf_fd}, {video_fd})");
        }
        if conf_fd == video_fd {
            bail!("configuration and video pipes share descriptor {conf_fd}");
        }

        // SAFETY: the parent passes two distinct descriptors that were opened
        // for us and nothing else in this process has wrapped them.
        let (conf, video) = unsafe { (OwnedFd::from_raw_fd(conf_fd), OwnedFd::from_raw_fd(video_fd)) };

        log::debug!("pipes: conf fd={conf_fd}, video fd={video_fd}");
        Ok(Self {
            conf: Recver::from(conf),
            video: Sender::from(video),
        })
    }
}
