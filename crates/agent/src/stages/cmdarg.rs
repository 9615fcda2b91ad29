// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container entrypoint command assembly

use crate::config::SandboxType;
use crate::provision::{ProvisionError, Provisioner};
use async_trait::async_trait;

const STAGE: &str = "cmdarg";

#[derive(Debug, Clone)]
pub struct CmdArgSpec {
    pub runtime_type: String,
    pub runtime_path: Option<String>,
    pub sandbox_type: SandboxType,
    pub jail_args: Vec<String>,
    pub debug_kernel_runner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdArgResult {
    pub cmdargs: Vec<String>,
}

#[derive(Default)]
pub struct CmdArgProvisioner;

#[async_trait]
impl Provisioner for CmdArgProvisioner {
    type Spec = CmdArgSpec;
    type Resource = CmdArgResult;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn setup(&self, spec: &CmdArgSpec) -> Result<CmdArgResult, ProvisionError> {
        let mut cmdargs: Vec<String> = Vec::new();
        if spec.sandbox_type == SandboxType::Jail {
            cmdargs.push("/opt/kernel/jail".to_string());
            cmdargs.extend(spec.jail_args.iter().map(|arg| arg.trim().to_string()));
            cmdargs.push("--".to_string());
        }
        cmdargs.extend(
            [
                "/opt/backend.ai/bin/python",
                "-s",
                "-m",
                "ai.backend.kernel",
            ]
            .map(str::to_string),
        );
        if spec.debug_kernel_runner {
            cmdargs.push("--debug".to_string());
        }
        cmdargs.push(spec.runtime_type.clone());
        if let Some(runtime_path) = &spec.runtime_path {
            cmdargs.push(runtime_path.clone());
        }
        Ok(CmdArgResult { cmdargs })
    }

    async fn teardown(&self, _resource: Option<&CmdArgResult>) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "cmdarg_tests.rs"]
mod tests;
