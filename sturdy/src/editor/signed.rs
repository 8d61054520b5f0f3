// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides the `SignedRepository` object which represents the output of
//! `RepositoryEditor` after signing, ready to be written to disk.

use crate::editor::keys::ResolvedKey;
use crate::error::{self, Result};
use crate::schema::{Role, Root, Signature, Signed, Snapshot, Target, Targets, Timestamp};
use aws_lc_rs::digest::{digest, SHA256, SHA256_OUTPUT_LEN};
use aws_lc_rs::rand::SecureRandom;
use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A signed role, including its serialized form (`buffer`), which is what
/// gets written to disk. The `sha256` and `length` are calculated from this
/// buffer and referenced in other roles' metadata, which makes it imperative
/// that this buffer is exactly what is written.
///
/// The buffer is the canonical JSON encoding of the whole envelope, so the
/// bytes other roles hash are also the bytes a client re-verifies.
#[derive(Debug, Clone)]
pub struct SignedRole<T> {
    pub(crate) signed: Signed<T>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) sha256: [u8; SHA256_OUTPUT_LEN],
    pub(crate) length: u64,
}

impl<T> SignedRole<T>
where
    T: Role + Serialize,
{
    /// Signs `role` with every provided signer and serializes the result.
    pub(crate) fn new(
        role: T,
        signers: &[ResolvedKey],
        rng: &(dyn SecureRandom + Sync),
    ) -> Result<Self> {
        ensure!(
            !signers.is_empty(),
            error::NoSignersSnafu {
                role: T::TYPE.to_string(),
            }
        );

        let data = role.canonical_form().context(error::CanonicalFormSnafu {
            role: T::TYPE.to_string(),
        })?;

        let mut signed = Signed {
            signed: role,
            signatures: Vec::new(),
        };
        for signer in signers {
            let sig = signer
                .sign
                .sign(&data, rng)
                .context(error::SignMessageSnafu)?;
            signed.signatures.push(Signature {
                keyid: signer.keyid.clone(),
                sig: sig.into(),
            });
        }

        Self::from_signed(signed)
    }

    /// Creates a `SignedRole<T>` from an already-signed envelope, computing
    /// the serialized buffer and its digest.
    pub fn from_signed(signed: Signed<T>) -> Result<Self> {
        let buffer =
            sturdy_cjson::to_canonical_vec(&signed).context(error::SerializeRoleSnafu {
                role: T::TYPE.to_string(),
            })?;
        let length = buffer.len() as u64;

        let mut sha256 = [0; SHA256_OUTPUT_LEN];
        sha256.copy_from_slice(digest(&SHA256, &buffer).as_ref());

        Ok(Self {
            signed,
            buffer,
            sha256,
            length,
        })
    }

    /// Provides access to the internal signed metadata object.
    pub fn signed(&self) -> &Signed<T> {
        &self.signed
    }

    /// Provides access to the serialized form of the signed role. This
    /// buffer should be used anywhere this role is written to file.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Provides the SHA-256 digest of the serialized role.
    pub fn sha256(&self) -> &[u8] {
        &self.sha256
    }

    /// Provides the length in bytes of the serialized role.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Writes the serialized role to `outdir` under `filename`.
    pub(crate) fn write_as(&self, outdir: &Path, filename: &str) -> Result<()> {
        fs::create_dir_all(outdir).context(error::DirCreateSnafu { path: outdir })?;
        let path = outdir.join(filename);
        fs::write(&path, &self.buffer).context(error::FileWriteSnafu { path })
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// What to do when writing a target into a directory where a file of that
/// name already exists, e.g. a targets directory shared between repositories.
#[derive(Debug, Clone, Copy)]
pub enum PathExists {
    /// Leave the existing file.
    Skip,
    /// Remove and replace the file.
    Replace,
    /// Stop writing targets and return an error.
    Fail,
}

/// A complete set of signed repository metadata, ready to be written to disk.
///
/// Note: without the target files, the repository cannot be used. It is up to
/// the user to ensure all the target files referenced by the metadata are
/// available; `copy_targets` and `link_targets` help with this.
#[derive(Debug)]
pub struct SignedRepository {
    pub(crate) root: SignedRole<Root>,
    pub(crate) targets: SignedRole<Targets>,
    pub(crate) delegated: Vec<(String, SignedRole<Targets>)>,
    pub(crate) snapshot: SignedRole<Snapshot>,
    pub(crate) timestamp: SignedRole<Timestamp>,
}

impl SignedRepository {
    /// Writes the repository's metadata files to the given directory. The
    /// root is written as both `root.json` and `root.<version>.json` so
    /// clients can walk the version history; the snapshot and targets roles
    /// are version-prefixed when consistent snapshots are in use.
    pub fn write<P: AsRef<Path>>(&self, outdir: P) -> Result<()> {
        let outdir = outdir.as_ref();
        let consistent = self.consistent_snapshot();

        self.root.write_as(outdir, "root.json")?;
        self.root.write_as(
            outdir,
            &format!("root.{}.json", self.root.signed.signed.version),
        )?;
        self.timestamp.write_as(outdir, "timestamp.json")?;
        self.snapshot
            .write_as(outdir, &self.snapshot.signed.signed.filename(consistent))?;
        self.targets
            .write_as(outdir, &self.targets.signed.signed.filename(consistent))?;
        for (name, role) in &self.delegated {
            let filename = if consistent {
                format!(
                    "{}.{}.json",
                    role.signed.signed.version,
                    crate::encode_filename(name)
                )
            } else {
                format!("{}.json", crate::encode_filename(name))
            };
            role.write_as(outdir, &filename)?;
        }
        Ok(())
    }

    /// Whether the signed root enables consistent snapshots.
    pub fn consistent_snapshot(&self) -> bool {
        self.root.signed.signed.consistent_snapshot
    }

    /// The signed root role.
    pub fn root(&self) -> &SignedRole<Root> {
        &self.root
    }

    /// The signed top-level targets role.
    pub fn targets(&self) -> &SignedRole<Targets> {
        &self.targets
    }

    /// The signed snapshot role.
    pub fn snapshot(&self) -> &SignedRole<Snapshot> {
        &self.snapshot
    }

    /// The signed timestamp role.
    pub fn timestamp(&self) -> &SignedRole<Timestamp> {
        &self.timestamp
    }

    /// Every target the repository describes, across the top-level role and
    /// all delegated roles.
    pub fn all_targets(&self) -> HashMap<&str, &Target> {
        let mut targets: HashMap<&str, &Target> = HashMap::new();
        for (name, target) in &self.targets.signed.signed.targets {
            targets.insert(name, target);
        }
        for (_, role) in &self.delegated {
            for (name, target) in &role.signed.signed.targets {
                targets.insert(name, target);
            }
        }
        targets
    }

    /// Crawls `indir` and copies any files that are targets of this
    /// repository into `outdir`, laid out the way a client will request them
    /// (hash-prefixed basenames under consistent snapshots). Files that are
    /// not targets are skipped; targets whose content does not match the
    /// metadata are an error.
    pub fn copy_targets<P1, P2>(
        &self,
        indir: P1,
        outdir: P2,
        replace_behavior: PathExists,
    ) -> Result<()>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        self.walk_targets(indir.as_ref(), outdir.as_ref(), replace_behavior, false)
    }

    /// Like [`SignedRepository::copy_targets`], but symlinks the files
    /// instead of copying them.
    #[cfg(unix)]
    pub fn link_targets<P1, P2>(
        &self,
        indir: P1,
        outdir: P2,
        replace_behavior: PathExists,
    ) -> Result<()>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        self.walk_targets(indir.as_ref(), outdir.as_ref(), replace_behavior, true)
    }

    fn walk_targets(
        &self,
        indir: &Path,
        outdir: &Path,
        replace_behavior: PathExists,
        link: bool,
    ) -> Result<()> {
        fs::create_dir_all(outdir).context(error::DirCreateSnafu { path: outdir })?;
        let abs_indir =
            fs::canonicalize(indir).context(error::AbsolutePathSnafu { path: indir })?;
        let repo_targets = self.all_targets();
        let consistent = self.consistent_snapshot();

        for entry in WalkDir::new(&abs_indir).follow_links(true) {
            let entry = entry.context(error::WalkDirSnafu {
                directory: &abs_indir,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            // The path relative to indir, with forward slashes, is the
            // target name.
            let relative = entry
                .path()
                .strip_prefix(&abs_indir)
                .expect("walked entries live under the walk root");
            let name = relative
                .to_str()
                .context(error::PathUtf8Snafu { path: relative })?
                .replace(std::path::MAIN_SEPARATOR, "/");

            let repo_target = match repo_targets.get(name.as_str()) {
                Some(target) => *target,
                // not a target of this repo; skip it
                None => continue,
            };

            // the file's content must match the signed metadata
            let described = Target::from_path(entry.path()).context(error::TargetFromPathSnafu {
                path: entry.path(),
            })?;
            ensure!(
                described.hashes.sha256 == repo_target.hashes.sha256,
                error::HashMismatchSnafu {
                    context: name.clone(),
                    calculated: described
                        .hashes
                        .sha256
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    expected: repo_target
                        .hashes
                        .sha256
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                }
            );

            let dest = self.target_dest(outdir, &name, repo_target, consistent)?;
            write_target(entry.path(), &dest, replace_behavior, link)?;
        }
        Ok(())
    }

    /// The on-disk path a client will request this target at.
    fn target_dest(
        &self,
        outdir: &Path,
        name: &str,
        target: &Target,
        consistent: bool,
    ) -> Result<PathBuf> {
        let segments = crate::safe_target_path(name)?;
        let mut dest = outdir.to_path_buf();
        let (basename, dirs) = segments.split_last().expect("paths have at least one segment");
        for dir in dirs {
            dest.push(crate::encode_filename(dir));
        }
        let basename = crate::encode_filename(basename);
        match (consistent, target.hashes.primary()) {
            (true, Some(hash)) => dest.push(format!("{}.{}", hash, basename)),
            _ => dest.push(basename),
        }
        Ok(dest)
    }
}

/// Copies or links a single file into place, honoring the caller's conflict
/// behavior.
fn write_target(input: &Path, dest: &Path, replace_behavior: PathExists, link: bool) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
    }
    if dest.exists() {
        match replace_behavior {
            PathExists::Skip => return Ok(()),
            PathExists::Fail => return error::PathExistsFailSnafu { path: dest }.fail(),
            PathExists::Replace => {
                fs::remove_file(dest).context(error::RemoveTargetSnafu { path: dest })?;
            }
        }
    }
    if link {
        #[cfg(unix)]
        std::os::unix::fs::symlink(input, dest)
            .context(error::LinkCreateSnafu { path: dest })?;
        #[cfg(not(unix))]
        return error::InvalidFileTypeSnafu { path: dest }.fail();
    } else {
        fs::copy(input, dest).context(error::FileWriteSnafu { path: dest })?;
    }
    Ok(())
}
