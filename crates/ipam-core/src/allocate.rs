//! Collision-free prefix allocation
//!
//! The allocator does not lock. It picks the lowest free candidate it can see,
//! writes it, then re-reads the parent's children to check that nobody else
//! grabbed an overlapping block in the meantime:
//!
//! 1. Reject a length that is not longer than the parent's
//! 2. Start from `parent.address/length`
//! 3. Skip over every child and blocklisted block that overlaps the candidate
//! 4. Persist the candidate (the store rejects a second writer of the same CIDR)
//! 5. Re-read the children; keep the candidate if it is the only overlap,
//!    otherwise delete it and go back to 3

use crate::{Cidr, IpamError, Result};
use ipam_store::{Prefix, Storage, WriteOptions};
use tracing::{debug, instrument, warn};

/// Allocate a `length` block named `name` under `parent`
pub async fn allocate(
    store: &dyn Storage,
    parent: &Prefix,
    name: &str,
    length: u8,
    opts: &WriteOptions,
) -> Result<Prefix> {
    allocate_with_blocklist(store, parent, name, length, &[], opts).await
}

/// Allocate a `length` block under `parent`, never handing out anything in `blocklist`
#[instrument(skip(store, parent, blocklist, opts), fields(parent = parent.name(), parent_cidr = parent.cidr()))]
pub async fn allocate_with_blocklist(
    store: &dyn Storage,
    parent: &Prefix,
    name: &str,
    length: u8,
    blocklist: &[Cidr],
    opts: &WriteOptions,
) -> Result<Prefix> {
    let parent_block = Cidr::parse(parent.cidr())?;
    let max = parent_block.family().max_len();
    if length <= parent_block.prefix_len() || length > max {
        return Err(IpamError::InvalidLength {
            requested: length,
            parent: parent_block.prefix_len(),
            max,
        });
    }

    let first = parent_block.resized(length)?;
    let mut candidate = first;
    let mut children = child_blocks(&store.get_children(parent).await?);

    loop {
        let exclusions: Vec<Cidr> = children.iter().chain(blocklist).copied().collect();
        while let Some(collision) = exclusions.iter().find(|block| block.overlaps(&candidate)) {
            // Jump to the first block of our size past the collision
            candidate = Cidr::new(collision.last_address(), length)?.next();
            if candidate == first || !parent_block.contains(&candidate) {
                return Err(IpamError::NoSpaceAvailable {
                    parent: parent.cidr().to_string(),
                });
            }
        }

        let prefix = Prefix::child(name, candidate.to_string(), parent);
        match store.add(&prefix, opts).await {
            Ok(()) => {}
            Err(e) if e.is_uniqueness_conflict() => {
                debug!(candidate = %candidate, "Candidate taken by a concurrent writer");
                children = child_blocks(&store.get_children(parent).await?);
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        let current = store.get_children(parent).await?;
        let mut collisions = current.iter().filter(|child| {
            Cidr::parse(child.cidr()).is_ok_and(|block| block.overlaps(&candidate))
        });
        let confirmed = matches!(
            (collisions.next(), collisions.next()),
            (Some(only), None) if *only == prefix
        );
        if confirmed {
            debug!(name, cidr = %candidate, "Prefix allocated");
            return Ok(prefix);
        }

        debug!(candidate = %candidate, "Candidate overlaps a concurrent allocation, retrying");
        store.delete(&prefix).await?;
        children = child_blocks(&current);
    }
}

fn child_blocks(children: &[Prefix]) -> Vec<Cidr> {
    children
        .iter()
        .filter_map(|child| match Cidr::parse(child.cidr()) {
            Ok(block) => Some(block),
            Err(e) => {
                warn!(name = child.name(), error = %e, "Ignoring child with unparseable cidr");
                None
            }
        })
        .collect()
}
