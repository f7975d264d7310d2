//! Idempotent provisioning of server-side entities.
//!
//! Every create is guarded by an existence query, so repeating a whole
//! analysis session against the same server is safe.

use anyhow::{Context, Result};

/// Outcome of [`ensure_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    AlreadyPresent,
    Created,
}

/// Run `create` unless `query` reports that `what` already exists.
pub fn ensure_exists<Q, C>(what: &str, query: Q, create: C) -> Result<Provisioned>
where
    Q: FnOnce() -> Result<bool>,
    C: FnOnce() -> Result<()>,
{
    if query().with_context(|| format!("checking whether {what} exists"))? {
        tracing::debug!("{what} already exists");
        return Ok(Provisioned::AlreadyPresent);
    }

    tracing::info!("Creating {what}");
    create().with_context(|| format!("creating {what}"))?;
    Ok(Provisioned::Created)
}

/// `cov-manage-im --nh` prints the matching field first; anything else,
/// including no output at all, means the entity is missing.
pub fn first_line_is(output: &str, expected: &str) -> bool {
    output.split('\n').next() == Some(expected)
}
