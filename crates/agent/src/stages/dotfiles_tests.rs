// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn dotfile(path: &str, perm: &str) -> DotfileInfo {
    DotfileInfo {
        path: path.to_string(),
        data: "content".to_string(),
        perm: perm.to_string(),
    }
}

#[tokio::test]
async fn writes_dotfiles_with_mode() {
    let dir = tempfile::tempdir().unwrap();
    let result = DotfilesProvisioner
        .setup(&DotfilesSpec {
            work_dir: dir.path().to_path_buf(),
            dotfiles: vec![dotfile(".vimrc", "644"), dotfile(".config/app/rc", "600")],
            ownership: ContainerOwnership::default(),
        })
        .await
        .unwrap();
    assert_eq!(result.written.len(), 2);
    assert!(dir.path().join(".vimrc").exists());
    assert!(dir.path().join(".config/app/rc").exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(dir.path().join(".config/app/rc"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[parameterized(
    bashrc_sample = { ".bashrc.sample" },
    ssh_dir = { ".ssh" },
    nested_ssh = { ".ssh/authorized_keys" },
    jupyter = { ".jupyter" },
)]
fn reserved_names_are_rejected(path: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let err = DotfilesProvisioner
            .setup(&DotfilesSpec {
                work_dir: dir.path().to_path_buf(),
                dotfiles: vec![dotfile(path, "644")],
                ownership: ContainerOwnership::default(),
            })
            .await
            .unwrap_err();
        assert!(err.cause.contains("not allowed"), "{}", err.cause);
    });
}

#[tokio::test]
async fn absolute_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = DotfilesProvisioner
        .setup(&DotfilesSpec {
            work_dir: dir.path().to_path_buf(),
            dotfiles: vec![dotfile("/etc/passwd", "644")],
            ownership: ContainerOwnership::default(),
        })
        .await
        .unwrap_err();
    assert!(err.cause.contains("absolute"));
}

#[tokio::test]
async fn malformed_permission_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = DotfilesProvisioner
        .setup(&DotfilesSpec {
            work_dir: dir.path().to_path_buf(),
            dotfiles: vec![dotfile(".vimrc", "rw-")],
            ownership: ContainerOwnership::default(),
        })
        .await
        .unwrap_err();
    assert!(err.cause.contains("bad permission"));
}
