// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set at build time, e.g. `GIT_REVISION=$(git rev-parse HEAD) cargo build`.
pub const GIT_REVISION: &str = match option_env!("GIT_REVISION") {
    Some(revision) => revision,
    None => "unknown",
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum VersionFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub target: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            commit: GIT_REVISION.to_string(),
            target: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    pub fn render(&self, format: VersionFormat) -> anyhow::Result<String> {
        Ok(match format {
            VersionFormat::Text => serde_yaml::to_string(self)?,
            VersionFormat::Json => serde_json::to_string(self)?,
        })
    }
}
