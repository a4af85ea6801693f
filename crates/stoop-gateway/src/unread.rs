//! Unread Aggregator: derived, pull-based unread counts. Never a durable
//! write target — every query recomputes from the Message Store minus the
//! Read-Marker Store, so the result is always reconstructible from those
//! two sources. Query cost is O(unread), staleness is zero.

use std::collections::BTreeMap;
use std::sync::Arc;

use stoop_db::Database;
use stoop_types::api::{UnreadBadge, UnreadOverview};
use stoop_types::{ChatError, MessageKind, SurfaceRef, UnreadBucket};

use crate::membership::MembershipProvider;

#[derive(Clone)]
pub struct UnreadAggregator {
    db: Arc<Database>,
    membership: Arc<dyn MembershipProvider>,
}

impl UnreadAggregator {
    pub fn new(db: Arc<Database>, membership: Arc<dyn MembershipProvider>) -> Self {
        Self { db, membership }
    }

    /// Per-surface unread counts across every surface the user participates
    /// in. Sparse: zero-count surfaces are omitted, so payload size scales
    /// with actual unread surfaces.
    pub fn unread_for(&self, user_id: i64) -> Result<BTreeMap<SurfaceRef, u64>, ChatError> {
        let mut out = BTreeMap::new();
        for surface in self.membership.surfaces_of(user_id)? {
            let marker = self.db.get_marker(user_id, surface)?;
            let count = self.db.count_since(surface, marker, Some(user_id))?;
            if count > 0 {
                out.insert(surface, count);
            }
        }
        Ok(out)
    }

    /// Unread totals partitioned by bucket, sparse like `unread_for`.
    pub fn unread_totals(&self, user_id: i64) -> Result<BTreeMap<UnreadBucket, u64>, ChatError> {
        let mut totals: BTreeMap<UnreadBucket, u64> = BTreeMap::new();
        for surface in self.membership.surfaces_of(user_id)? {
            let marker = self.db.get_marker(user_id, surface)?;
            let counts = self.db.count_since_by_kind(surface, marker, Some(user_id))?;
            for (kind, n) in [(MessageKind::Chat, counts.chat), (MessageKind::System, counts.system)] {
                if n > 0 {
                    *totals
                        .entry(UnreadBucket::for_message(surface.kind(), kind))
                        .or_default() += n;
                }
            }
        }
        Ok(totals)
    }

    /// Badge payload: event-thread surfaces only, with chat unread summed
    /// into EVENT and system notices into NOTIFICATION. The per-surface map
    /// always totals to EVENT + NOTIFICATION.
    pub fn badge(&self, user_id: i64) -> Result<UnreadBadge, ChatError> {
        let mut badge = UnreadBadge::default();
        for surface in self.membership.surfaces_of(user_id)? {
            let SurfaceRef::Event(_) = surface else {
                continue;
            };
            let marker = self.db.get_marker(user_id, surface)?;
            let counts = self.db.count_since_by_kind(surface, marker, Some(user_id))?;
            let total = counts.chat + counts.system;
            if total > 0 {
                badge.count.insert(surface.room_key(), total);
                badge.event += counts.chat;
                badge.notification += counts.system;
            }
        }
        Ok(badge)
    }

    /// Full cross-surface view: sparse per-surface counts plus bucket
    /// totals.
    pub fn overview(&self, user_id: i64) -> Result<UnreadOverview, ChatError> {
        let surfaces = self
            .unread_for(user_id)?
            .into_iter()
            .map(|(surface, n)| (surface.room_key(), n))
            .collect();
        Ok(UnreadOverview {
            surfaces,
            totals: self.unread_totals(user_id)?,
        })
    }
}
