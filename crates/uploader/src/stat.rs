//! Ownership and permission capture.

use std::fs::Metadata;

use tablevault_store::FileStat;

/// Captures uid, gid, mode and best-effort user/group names.
#[cfg(unix)]
pub fn capture_stat(metadata: &Metadata) -> FileStat {
    use nix::unistd::{Gid, Group, Uid, User};
    use std::os::unix::fs::MetadataExt;

    let uid = metadata.uid();
    let gid = metadata.gid();
    let user = User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name);
    let group = Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|g| g.name);

    FileStat {
        uid,
        gid,
        mode: metadata.mode(),
        user,
        group,
        part_size: None,
    }
}

#[cfg(not(unix))]
pub fn capture_stat(metadata: &Metadata) -> FileStat {
    let mode = if metadata.permissions().readonly() {
        0o100444
    } else {
        0o100644
    };
    FileStat {
        mode,
        ..FileStat::default()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    #[test]
    fn captures_owner_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        std::fs::write(&path, b"x").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        let stat = capture_stat(&meta);
        assert_eq!(stat.uid, meta.uid());
        assert_eq!(stat.gid, meta.gid());
        assert_eq!(stat.mode & 0o777, 0o640);
        assert_eq!(stat.mode & 0o170000, 0o100000);
        assert_eq!(stat.part_size, None);
    }
}
