// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Smart-HTTP transport plumbing for the minted clone URLs.
//!
//! Implements the stateless-rpc halves of the git smart protocol by
//! delegating to `git upload-pack` / `git receive-pack` against the
//! bare repository. The HTTP layer maps these onto
//! `GET /info/refs?service=...` and `POST /git-{upload,receive}-pack`.

use crate::cmd::{git_rpc, GitError};
use crate::store::RepoHandle;

/// The two smart services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartService {
    UploadPack,
    ReceivePack,
}

impl SmartService {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "git-upload-pack" => Some(SmartService::UploadPack),
            "git-receive-pack" => Some(SmartService::ReceivePack),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SmartService::UploadPack => "git-upload-pack",
            SmartService::ReceivePack => "git-receive-pack",
        }
    }

    fn subcommand(&self) -> &'static str {
        match self {
            SmartService::UploadPack => "upload-pack",
            SmartService::ReceivePack => "receive-pack",
        }
    }

    /// Content type of the ref advertisement response.
    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.name())
    }

    /// Content type of the rpc result response.
    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.name())
    }
}

impl RepoHandle {
    /// Ref advertisement for `GET /info/refs?service=<name>`, with the
    /// smart-protocol service header prepended.
    pub async fn advertise_refs(&self, service: SmartService) -> Result<Vec<u8>, GitError> {
        let refs = git_rpc(
            &self.bare_dir,
            &[service.subcommand(), "--stateless-rpc", "--advertise-refs", "."],
            &[],
        )
        .await?;

        let mut body = pkt_line(&format!("# service={}\n", service.name()));
        body.extend_from_slice(b"0000");
        body.extend_from_slice(&refs);
        Ok(body)
    }

    /// Execute one stateless-rpc exchange: the request body is the
    /// client's pkt stream, the return value is the service's reply.
    ///
    /// Receive-pack mutates refs, so it holds the repo write lock.
    pub async fn service_rpc(
        &self,
        service: SmartService,
        input: &[u8],
    ) -> Result<Vec<u8>, GitError> {
        match service {
            SmartService::UploadPack => {
                git_rpc(
                    &self.bare_dir,
                    &["upload-pack", "--stateless-rpc", "."],
                    input,
                )
                .await
            }
            SmartService::ReceivePack => {
                let _guard = self.write_lock.lock().await;
                git_rpc(
                    &self.bare_dir,
                    &["receive-pack", "--stateless-rpc", "."],
                    input,
                )
                .await
            }
        }
    }
}

/// Encode one pkt-line: 4-hex-digit length prefix including itself.
fn pkt_line(payload: &str) -> Vec<u8> {
    let total = payload.len() + 4;
    let mut line = format!("{total:04x}").into_bytes();
    line.extend_from_slice(payload.as_bytes());
    line
}

#[cfg(test)]
#[path = "smart_tests.rs"]
mod tests;
