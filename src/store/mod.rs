//! Layer store: a revision-control repository exposing
//! the image's layer chain as one branch per layer.
//!
//! `LayerStore` shells out to a `git`-compatible binary via
//! `std::process::Command` rather than decoding the object model
//! in-process, so every operation here is a subprocess call against a
//! real working tree.

mod branch;

pub use branch::Branch;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::ClientError;
use crate::tarcodec::{ChangeKind, TarCodec};

/// One name-status diff entry as reported by the revision-control
/// command (`diff_cached_name_status`, `diff_branches`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: ChangeKind,
    pub path: String,
}

/// A layer chain exposed as a git-like working tree, one branch per
/// layer.
pub struct LayerStore {
    root: PathBuf,
}

fn run_git(root: &Path, args: &[&str]) -> Result<String, ClientError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .map_err(|e| ClientError::StoreError(format!("failed to spawn git: {e}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(ClientError::StoreError(format!(
            "git {} failed: {}",
            args.join(" "),
            combined.trim()
        )));
    }
    Ok(combined)
}

impl LayerStore {
    /// Reuse an existing store at `root`, or initialize a fresh one and
    /// set committer identity defaults so later commits succeed.
    pub fn open_or_init(root: &Path) -> Result<Self, ClientError> {
        std::fs::create_dir_all(root)?;
        let is_repo = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        if !is_repo {
            run_git(root, &["init"])?;
            run_git(root, &["config", "user.name", "krogon"])?;
            run_git(root, &["config", "user.email", "krogon@localhost"])?;
        }

        Ok(LayerStore {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkout(&self, branch: &Branch) -> Result<(), ClientError> {
        run_git(&self.root, &["checkout", &branch.to_string()])?;
        Ok(())
    }

    pub fn checkout_new(&self, branch: &Branch) -> Result<(), ClientError> {
        run_git(&self.root, &["checkout", "-b", &branch.to_string()])?;
        Ok(())
    }

    pub fn stage_all(&self) -> Result<(), ClientError> {
        run_git(&self.root, &["add", "-A"])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<(), ClientError> {
        run_git(&self.root, &["commit", "-m", message, "--allow-empty-message"])?;
        Ok(())
    }

    pub fn stage_and_commit(&self, message: &str) -> Result<(), ClientError> {
        self.stage_all()?;
        self.commit(message)
    }

    /// Branches in chain order (position N first). Lines are trimmed
    /// of leading whitespace and the `* ` current-branch marker before
    /// being parsed as `layer<N>_<ID>`; anything else is ignored.
    pub fn branches(&self) -> Result<Vec<Branch>, ClientError> {
        let output = run_git(&self.root, &["branch", "--list"])?;
        let mut branches: Vec<Branch> = output
            .lines()
            .filter_map(|line| {
                let trimmed = line.trim_start_matches('*').trim();
                trimmed.parse::<Branch>().ok()
            })
            .collect();
        branches.sort_by_key(|b| b.number);
        Ok(branches)
    }

    pub fn current_branch(&self) -> Result<Branch, ClientError> {
        let output = run_git(&self.root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        output
            .trim()
            .parse::<Branch>()
            .map_err(ClientError::StoreError)
    }

    /// Staged changes vs HEAD. Stages everything first, per §4.3.
    pub fn diff_cached_name_status(&self) -> Result<Vec<DiffEntry>, ClientError> {
        self.stage_all()?;
        let output = run_git(&self.root, &["diff", "--cached", "--name-status"])?;
        parse_name_status(&output)
    }

    pub fn diff_branches(&self, a: &Branch, b: &Branch) -> Result<Vec<DiffEntry>, ClientError> {
        let output = run_git(
            &self.root,
            &["diff", "--name-status", &a.to_string(), &b.to_string()],
        )?;
        parse_name_status(&output)
    }

    /// Attach a short annotation to `branch` (used to persist the V2
    /// digest algorithm alongside the layer it applies to).
    pub fn describe_branch(&self, branch: &Branch, text: &str) -> Result<(), ClientError> {
        run_git(
            &self.root,
            &["notes", "--ref", "krogon-layers", "add", "-f", "-m", text, &branch.to_string()],
        )?;
        Ok(())
    }

    pub fn branch_description(&self, branch: &Branch) -> Result<Option<String>, ClientError> {
        match run_git(
            &self.root,
            &["notes", "--ref", "krogon-layers", "show", &branch.to_string()],
        ) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(_) => Ok(None),
        }
    }

    /// The working-tree diff against HEAD, exported as a streaming tar
    /// archive translated to the AUFS whiteout convention. Fails with
    /// `NoChange` if nothing is staged.
    pub fn export_uncommitted(
        &self,
        codec: &dyn TarCodec,
    ) -> Result<Box<dyn Read + Send>, ClientError> {
        let diff = self.diff_cached_name_status()?;
        if diff.is_empty() {
            return Err(ClientError::NoChange);
        }
        let changes: Vec<(ChangeKind, PathBuf)> =
            diff.into_iter().map(|d| (d.kind, PathBuf::from(d.path))).collect();
        codec
            .export_changes(&self.root, &changes)
            .map_err(ClientError::from)
    }

    /// The tar archive representing `branch`'s layer: full directory
    /// content for the root branch, branch-vs-parent diff otherwise.
    /// The originally checked-out branch is restored on every exit
    /// path.
    pub fn export_changeset(
        &self,
        branch: &Branch,
        codec: &dyn TarCodec,
    ) -> Result<Box<dyn Read + Send>, ClientError> {
        let original = self.current_branch()?;
        let _restore = RestoreBranch {
            store: self,
            original: &original,
        };

        self.checkout(branch)?;

        if branch.number == 0 {
            codec
                .export_changes(&self.root, &full_tree_as_adds(&self.root)?)
                .map_err(ClientError::from)
        } else {
            let parent = self
                .branches()?
                .into_iter()
                .find(|b| b.number == branch.number - 1)
                .ok_or_else(|| {
                    ClientError::StoreError(format!("no parent branch for {branch}"))
                })?;
            let diff = self.diff_branches(&parent, branch)?;
            let changes: Vec<(ChangeKind, PathBuf)> =
                diff.into_iter().map(|d| (d.kind, PathBuf::from(d.path))).collect();
            codec
                .export_changes(&self.root, &changes)
                .map_err(ClientError::from)
        }
    }
}

/// Checkout-and-restore guard: restores the original branch on drop so
/// `export_changeset` leaves the store exactly as it found it, even
/// when an intermediate step returns early via `?`.
struct RestoreBranch<'a> {
    store: &'a LayerStore,
    original: &'a Branch,
}

impl Drop for RestoreBranch<'_> {
    fn drop(&mut self) {
        let _ = self.store.checkout(self.original);
    }
}

fn parse_name_status(output: &str) -> Result<Vec<DiffEntry>, ClientError> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut parts = line.splitn(2, char::is_whitespace);
            let kind = match parts.next() {
                Some("A") => ChangeKind::Add,
                Some("M") => ChangeKind::Modify,
                Some("D") => ChangeKind::Delete,
                other => {
                    return Err(ClientError::StoreError(format!(
                        "unrecognized diff status: {other:?}"
                    )))
                }
            };
            let path = parts
                .next()
                .ok_or_else(|| ClientError::StoreError(format!("malformed diff line: {line}")))?
                .trim()
                .to_string();
            Ok(DiffEntry { kind, path })
        })
        .collect()
}

/// Enumerate the root branch's full recursive content (excluding
/// revision-control metadata) as `Add` entries, per §4.3's root-branch
/// rule.
fn full_tree_as_adds(root: &Path) -> Result<Vec<(ChangeKind, PathBuf)>, ClientError> {
    let mut entries = Vec::new();
    walk(root, root, &mut entries)?;
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(ChangeKind, PathBuf)>) -> Result<(), ClientError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| ClientError::StoreError(e.to_string()))?
                .to_path_buf();
            out.push((ChangeKind::Add, rel));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_status_reads_all_three_kinds() {
        let out = "A\tnew.txt\nM\tchanged.txt\nD\tgone.txt\n";
        let entries = parse_name_status(out).unwrap();
        assert_eq!(
            entries,
            vec![
                DiffEntry {
                    kind: ChangeKind::Add,
                    path: "new.txt".to_string()
                },
                DiffEntry {
                    kind: ChangeKind::Modify,
                    path: "changed.txt".to_string()
                },
                DiffEntry {
                    kind: ChangeKind::Delete,
                    path: "gone.txt".to_string()
                },
            ]
        );
    }

    #[test]
    fn parse_name_status_rejects_unknown_kind() {
        assert!(parse_name_status("R100\told.txt\tnew.txt\n").is_err());
    }

    #[test]
    fn parse_name_status_skips_blank_lines() {
        let entries = parse_name_status("\nA\tfoo.txt\n\n").unwrap();
        assert_eq!(entries.len(), 1);
    }

    /// Records whatever `(ChangeKind, PathBuf)` pairs it was last asked
    /// to export, so a test can assert on them without a real tar
    /// implementation.
    struct RecordingCodec {
        captured: std::sync::Mutex<Vec<(ChangeKind, PathBuf)>>,
    }

    impl RecordingCodec {
        fn new() -> Self {
            RecordingCodec {
                captured: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn captured(&self) -> Vec<(ChangeKind, PathBuf)> {
            self.captured.lock().unwrap().clone()
        }
    }

    impl TarCodec for RecordingCodec {
        fn apply_layer(
            &self,
            _dest: &Path,
            _layer: &mut dyn Read,
            _restore_ownership: bool,
        ) -> Result<(), crate::tarcodec::TarError> {
            Ok(())
        }

        fn export_changes(
            &self,
            _root: &Path,
            changes: &[(ChangeKind, PathBuf)],
        ) -> Result<Box<dyn Read + Send>, crate::tarcodec::TarError> {
            *self.captured.lock().unwrap() = changes.to_vec();
            Ok(Box::new(std::io::Cursor::new(Vec::new())))
        }
    }

    #[test]
    fn git_flow_branches_diff_and_export_changeset() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayerStore::open_or_init(dir.path()).unwrap();

        let branch0 = Branch::new(0, "base");
        store.checkout_new(&branch0).unwrap();
        std::fs::write(dir.path().join("etc_passwd"), b"root:x:0:0\n").unwrap();
        store.stage_and_commit("base layer").unwrap();

        let branch1 = Branch::new(1, "child");
        store.checkout_new(&branch1).unwrap();
        std::fs::remove_file(dir.path().join("etc_passwd")).unwrap();
        std::fs::write(dir.path().join("etc_hosts"), b"127.0.0.1 localhost\n").unwrap();
        store.stage_and_commit("child layer").unwrap();

        assert_eq!(store.branches().unwrap(), vec![branch0.clone(), branch1.clone()]);
        assert_eq!(store.current_branch().unwrap(), branch1);

        let diff = store.diff_branches(&branch0, &branch1).unwrap();
        assert!(diff.iter().any(|d| d.kind == ChangeKind::Delete && d.path == "etc_passwd"));
        assert!(diff.iter().any(|d| d.kind == ChangeKind::Add && d.path == "etc_hosts"));

        let codec = RecordingCodec::new();

        // Root branch exports its full tree, not a diff against anything.
        store.export_changeset(&branch0, &codec).unwrap();
        let root_changes = codec.captured();
        assert!(root_changes
            .iter()
            .any(|(k, p)| *k == ChangeKind::Add && p == &PathBuf::from("etc_passwd")));

        // Non-root branch exports the diff against its parent.
        store.export_changeset(&branch1, &codec).unwrap();
        let child_changes = codec.captured();
        assert!(child_changes
            .iter()
            .any(|(k, p)| *k == ChangeKind::Delete && p == &PathBuf::from("etc_passwd")));
        assert!(child_changes
            .iter()
            .any(|(k, p)| *k == ChangeKind::Add && p == &PathBuf::from("etc_hosts")));

        // export_changeset must leave the originally checked-out branch in place.
        assert_eq!(store.current_branch().unwrap(), branch1);
    }

    #[test]
    fn export_uncommitted_requires_a_dirty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayerStore::open_or_init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
        store.stage_and_commit("initial").unwrap();

        let codec = RecordingCodec::new();
        assert!(matches!(store.export_uncommitted(&codec), Err(ClientError::NoChange)));

        std::fs::write(dir.path().join("a.txt"), b"hello again\n").unwrap();
        store.export_uncommitted(&codec).unwrap();
        assert_eq!(
            codec.captured(),
            vec![(ChangeKind::Modify, PathBuf::from("a.txt"))]
        );
    }

    #[test]
    fn describe_branch_persists_and_is_absent_for_undescribed_branches() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayerStore::open_or_init(dir.path()).unwrap();
        let branch0 = Branch::new(0, "base");
        store.checkout_new(&branch0).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi\n").unwrap();
        store.stage_and_commit("base layer").unwrap();

        assert_eq!(store.branch_description(&branch0).unwrap(), None);
        store.describe_branch(&branch0, "tarsum.dev+sha256").unwrap();
        assert_eq!(
            store.branch_description(&branch0).unwrap(),
            Some("tarsum.dev+sha256".to_string())
        );
    }
}
