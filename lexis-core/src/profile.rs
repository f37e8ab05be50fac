//! Per-user review state.
//!
//! A [`ReviewProfile`] is the in-memory projection of one learner's cards.
//! Every created word sits in exactly one lifecycle stage: due now, waiting
//! for a future time, or mastered. The `known` set only records how a card
//! was initialised and overlaps the stages.
//!
//! The profile is a plain value. Serialising access across concurrent
//! requests is the owner's job (see the review cache in `lexis-storage`).

use crate::error::{LexisError, NotFoundError, ValidationError};
use crate::schedule::{next_review_time, KNOWN_INITIAL_VIEWS, MASTERY_THRESHOLD, NEW_CARD_VIEWS};
use crate::{Card, Timestamp, UserId, WordId};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// How a recorded review changes the card's stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// Passed; card waits until the given time.
    Rescheduled(Timestamp),
    /// Failed; card goes back to the end of the due queue.
    Retry,
    /// Passed and reached the mastery threshold; card leaves scheduling.
    Mastered,
}

impl ReviewOutcome {
    /// Outcome of a pass at `reviewed_at` for a card that had `prior_views`
    /// successful views before this one.
    pub fn after_pass(reviewed_at: Timestamp, prior_views: i32) -> Self {
        if prior_views.saturating_add(1) >= MASTERY_THRESHOLD {
            ReviewOutcome::Mastered
        } else {
            ReviewOutcome::Rescheduled(next_review_time(reviewed_at, prior_views, true))
        }
    }
}

/// Read-only counts of a profile, for inspection endpoints and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProfileSnapshot {
    pub user_id: UserId,
    pub created: usize,
    pub known: usize,
    pub mastered: usize,
    pub due: usize,
    pub waiting: usize,
    pub last_created: Option<WordId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub next_due_at: Option<Timestamp>,
}

/// In-memory review state for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewProfile {
    user_id: UserId,
    created: BTreeSet<WordId>,
    known: BTreeSet<WordId>,
    mastered: BTreeSet<WordId>,
    due: VecDeque<WordId>,
    /// Ordered by (due epoch seconds, word id).
    waiting: BTreeSet<(i64, WordId)>,
}

impl ReviewProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            created: BTreeSet::new(),
            known: BTreeSet::new(),
            mastered: BTreeSet::new(),
            due: VecDeque::new(),
            waiting: BTreeSet::new(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn contains(&self, word_id: WordId) -> bool {
        self.created.contains(&word_id)
    }

    pub fn is_known(&self, word_id: WordId) -> bool {
        self.known.contains(&word_id)
    }

    pub fn is_mastered(&self, word_id: WordId) -> bool {
        self.mastered.contains(&word_id)
    }

    pub fn is_due(&self, word_id: WordId) -> bool {
        self.due.contains(&word_id)
    }

    pub fn is_waiting(&self, word_id: WordId) -> bool {
        self.waiting.iter().any(|(_, id)| *id == word_id)
    }

    /// Highest word id with a card, if any.
    pub fn last_created(&self) -> Option<WordId> {
        self.created.last().copied()
    }

    /// Due queue in review order.
    pub fn due_words(&self) -> impl Iterator<Item = WordId> + '_ {
        self.due.iter().copied()
    }

    /// Waiting entries in ascending due order.
    pub fn waiting_entries(&self) -> impl Iterator<Item = (Timestamp, WordId)> + '_ {
        self.waiting
            .iter()
            .map(|(secs, id)| (epoch_to_timestamp(*secs), *id))
    }

    // ========================================================================
    // CARD CREATION
    // ========================================================================

    /// Validate that a card for `word_id` may be created.
    ///
    /// With `enforce_sequence`, new words must have a larger id than every
    /// word already introduced. Gaps are allowed.
    pub fn check_new_card(&self, word_id: WordId, enforce_sequence: bool) -> Result<(), ValidationError> {
        if self.created.contains(&word_id) {
            return Err(ValidationError::CardAlreadyCreated {
                user_id: self.user_id,
                word_id,
            });
        }
        if enforce_sequence {
            if let Some(last_word_id) = self.last_created() {
                if word_id < last_word_id {
                    return Err(ValidationError::CardOutOfSequence { word_id, last_word_id });
                }
            }
        }
        Ok(())
    }

    /// Record a new card and return its initial view count.
    ///
    /// Known words start at the mastery threshold and are never scheduled.
    /// Unknown words start at one view and join the due queue.
    pub fn record_new_card(&mut self, word_id: WordId, known: bool) -> Result<i32, ValidationError> {
        self.check_new_card(word_id, false)?;
        self.created.insert(word_id);
        if known {
            self.known.insert(word_id);
            self.mastered.insert(word_id);
            Ok(KNOWN_INITIAL_VIEWS)
        } else {
            self.due.push_back(word_id);
            Ok(NEW_CARD_VIEWS)
        }
    }

    // ========================================================================
    // REVIEWS
    // ========================================================================

    /// Validate that `word_id` can be reviewed right now.
    pub fn check_review(&self, word_id: WordId) -> Result<(), LexisError> {
        if !self.created.contains(&word_id) {
            return Err(NotFoundError::CardNotFound {
                user_id: self.user_id,
                word_id,
            }
            .into());
        }
        if !self.due.contains(&word_id) {
            return Err(ValidationError::WordNotDue {
                user_id: self.user_id,
                word_id,
            }
            .into());
        }
        Ok(())
    }

    /// Move a due word to the stage `outcome` names.
    pub fn apply_review(&mut self, word_id: WordId, outcome: ReviewOutcome) -> Result<(), LexisError> {
        self.check_review(word_id)?;
        if let Some(pos) = self.due.iter().position(|id| *id == word_id) {
            self.due.remove(pos);
        }
        match outcome {
            ReviewOutcome::Rescheduled(at) => {
                self.waiting.insert((at.timestamp(), word_id));
            }
            ReviewOutcome::Retry => self.due.push_back(word_id),
            ReviewOutcome::Mastered => {
                self.mastered.insert(word_id);
            }
        }
        Ok(())
    }

    // ========================================================================
    // DUE QUEUE
    // ========================================================================

    /// Move every waiting entry due strictly before `now` onto the due queue,
    /// oldest first. Returns the promoted word ids in promotion order.
    pub fn promote_due(&mut self, now: Timestamp) -> Vec<WordId> {
        let cutoff = now.timestamp();
        let mut promoted = Vec::new();
        while let Some(&(secs, word_id)) = self.waiting.first() {
            if secs >= cutoff {
                break;
            }
            self.waiting.pop_first();
            self.due.push_back(word_id);
            promoted.push(word_id);
        }
        promoted
    }

    /// Number of due words after promotion.
    pub fn count_due(&mut self, now: Timestamp) -> usize {
        self.promote_due(now);
        self.due.len()
    }

    /// Up to `limit` due words in review order, after promotion.
    pub fn due_batch(&mut self, now: Timestamp, limit: usize) -> Vec<WordId> {
        self.promote_due(now);
        self.due.iter().take(limit).copied().collect()
    }

    // ========================================================================
    // REHYDRATION
    // ========================================================================

    /// Rebuild stages from persisted cards.
    ///
    /// Cards at or past the mastery threshold go to `mastered`. The rest are
    /// scheduled from their stored `last_view` and view count: due before
    /// `now` joins the due queue in due order, later ones wait. Whether a
    /// mastered card started as known is not persisted, so `known` stays
    /// empty for rehydrated words.
    pub fn restore_cards<'a, I>(&mut self, cards: I, now: Timestamp)
    where
        I: IntoIterator<Item = &'a Card>,
    {
        let mut overdue: Vec<(Timestamp, WordId)> = Vec::new();
        for card in cards {
            if card.user_id != self.user_id || !self.created.insert(card.word_id) {
                continue;
            }
            if card.is_mastered() {
                self.mastered.insert(card.word_id);
                continue;
            }
            let due_at = next_review_time(card.last_view, card.count_of_views, true);
            if due_at < now {
                overdue.push((due_at, card.word_id));
            } else {
                self.waiting.insert((due_at.timestamp(), card.word_id));
            }
        }
        overdue.sort();
        self.due.extend(overdue.into_iter().map(|(_, word_id)| word_id));
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            user_id: self.user_id,
            created: self.created.len(),
            known: self.known.len(),
            mastered: self.mastered.len(),
            due: self.due.len(),
            waiting: self.waiting.len(),
            last_created: self.last_created(),
            next_due_at: self.waiting.first().map(|(secs, _)| epoch_to_timestamp(*secs)),
        }
    }

    /// Every created word is in exactly one of due, waiting or mastered, and
    /// nothing outside `created` is staged.
    pub fn is_consistent(&self) -> bool {
        let mut staged = BTreeSet::new();
        let stages = self
            .due
            .iter()
            .chain(self.waiting.iter().map(|(_, id)| id))
            .chain(self.mastered.iter());
        for word_id in stages {
            if !staged.insert(*word_id) {
                return false;
            }
        }
        staged == self.created && self.known.is_subset(&self.created)
    }
}

fn epoch_to_timestamp(secs: i64) -> Timestamp {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}
