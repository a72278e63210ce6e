//! Property tests for manifest differencing.

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use vaultsync_common::VaultPath;
use vaultsync_sync::{compute_delta, FileInfo, SyncAction, VaultManifest};

const PATHS: &[&str] = &[
    "notes/a.md",
    "notes/b.md",
    "notes/deep/c.md",
    "library/d.pdf",
    "reference/e.txt",
    "config/f.json",
];

/// One side's view of a path: content id and mtime.
fn side() -> impl Strategy<Value = Option<(u8, u8)>> {
    prop::option::of((0u8..3, 0u8..4))
}

fn manifest(node: &str, entries: &BTreeMap<usize, (u8, u8)>) -> VaultManifest {
    VaultManifest::with_files(
        node,
        "/vault",
        entries.iter().map(|(&i, &(content, mtime))| {
            FileInfo::new(
                VaultPath::parse(PATHS[i]).unwrap(),
                format!("h{}", content),
                10,
                f64::from(mtime),
                0o644,
            )
        }),
    )
}

fn pair() -> impl Strategy<Value = (VaultManifest, VaultManifest)> {
    prop::collection::vec((side(), side()), PATHS.len()).prop_map(|sides| {
        let mut local = BTreeMap::new();
        let mut remote = BTreeMap::new();
        for (i, (l, r)) in sides.into_iter().enumerate() {
            if let Some(v) = l {
                local.insert(i, v);
            }
            if let Some(v) = r {
                remote.insert(i, v);
            }
        }
        (manifest("local", &local), manifest("remote", &remote))
    })
}

fn paths_of(changes: &[vaultsync_sync::FileChange]) -> BTreeSet<VaultPath> {
    changes.iter().map(|c| c.path().clone()).collect()
}

proptest! {
    #[test]
    fn delta_with_self_is_empty((local, _remote) in pair()) {
        prop_assert!(!compute_delta(&local, &local).has_changes());
    }

    #[test]
    fn every_differing_path_lands_in_exactly_one_list((local, remote) in pair()) {
        let delta = compute_delta(&local, &remote);
        let upload = paths_of(&delta.to_upload);
        let download = paths_of(&delta.to_download);
        let conflicts = paths_of(&delta.conflicts);

        prop_assert_eq!(upload.len() + download.len() + conflicts.len(), delta.total_changes());
        prop_assert!(upload.is_disjoint(&download));
        prop_assert!(upload.is_disjoint(&conflicts));
        prop_assert!(download.is_disjoint(&conflicts));

        let all: BTreeSet<&VaultPath> = local.files.keys().chain(remote.files.keys()).collect();
        for path in all {
            let same = match (local.get(path), remote.get(path)) {
                (Some(l), Some(r)) => l.hash == r.hash,
                _ => false,
            };
            let listed = upload.contains(path) || download.contains(path) || conflicts.contains(path);
            prop_assert_eq!(listed, !same, "path {}", path);
        }
    }

    #[test]
    fn direction_follows_presence_and_mtime((local, remote) in pair()) {
        let delta = compute_delta(&local, &remote);

        for change in &delta.to_upload {
            let l = local.get(change.path()).unwrap();
            match remote.get(change.path()) {
                None => prop_assert_eq!(change.action(), SyncAction::Add),
                Some(r) => prop_assert!(l.mtime > r.mtime),
            }
        }
        for change in &delta.to_download {
            let r = remote.get(change.path()).unwrap();
            match local.get(change.path()) {
                None => prop_assert_eq!(change.action(), SyncAction::Add),
                Some(l) => prop_assert!(r.mtime > l.mtime),
            }
        }
        for change in &delta.conflicts {
            prop_assert_eq!(change.action(), SyncAction::Conflict);
            let l = change.local_info().unwrap();
            let r = change.remote_info().unwrap();
            prop_assert!(l.mtime == r.mtime && l.hash != r.hash);
        }
    }

    #[test]
    fn swapping_sides_mirrors_the_delta((local, remote) in pair()) {
        let forward = compute_delta(&local, &remote);
        let backward = compute_delta(&remote, &local);

        prop_assert_eq!(paths_of(&forward.to_upload), paths_of(&backward.to_download));
        prop_assert_eq!(paths_of(&forward.to_download), paths_of(&backward.to_upload));
        prop_assert_eq!(paths_of(&forward.conflicts), paths_of(&backward.conflicts));
    }
}
