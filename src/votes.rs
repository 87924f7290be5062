// src/votes.rs
use serde::Serialize;
use std::collections::BTreeSet;

/// Who is casting a vote or posting a comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    Registered(String),
    Anonymous(String),
}

impl Actor {
    pub fn key(&self) -> &str {
        match self {
            Actor::Registered(id) | Actor::Anonymous(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Like,
    Dislike,
}

impl VoteDirection {
    pub fn past_tense(self) -> &'static str {
        match self {
            VoteDirection::Like => "liked",
            VoteDirection::Dislike => "disliked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    pub likes: u32,
    pub dislikes: u32,
}

/// Returned when the actor already holds a vote in the requested direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyVoted(pub VoteDirection);

/// Like/dislike state shared by stocks and comments.
///
/// Registered and anonymous actors live in separate sets so a user id can
/// never collide with a session token. The counters are stored alongside the
/// sets and are never allowed to underflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteLedger {
    pub likes: u32,
    pub dislikes: u32,
    pub liked_by: BTreeSet<String>,
    pub disliked_by: BTreeSet<String>,
    #[serde(skip)]
    pub liked_by_anonymous: BTreeSet<String>,
    #[serde(skip)]
    pub disliked_by_anonymous: BTreeSet<String>,
}

impl VoteLedger {
    pub fn tally(&self) -> VoteTally {
        VoteTally {
            likes: self.likes,
            dislikes: self.dislikes,
        }
    }

    #[cfg(test)]
    pub fn current_vote(&self, actor: &Actor) -> Option<VoteDirection> {
        let (liked, disliked) = match actor {
            Actor::Registered(_) => (&self.liked_by, &self.disliked_by),
            Actor::Anonymous(_) => (&self.liked_by_anonymous, &self.disliked_by_anonymous),
        };
        if liked.contains(actor.key()) {
            Some(VoteDirection::Like)
        } else if disliked.contains(actor.key()) {
            Some(VoteDirection::Dislike)
        } else {
            None
        }
    }

    pub fn apply(
        &mut self,
        actor: &Actor,
        direction: VoteDirection,
    ) -> Result<VoteTally, AlreadyVoted> {
        let Self {
            likes,
            dislikes,
            liked_by,
            disliked_by,
            liked_by_anonymous,
            disliked_by_anonymous,
        } = &mut *self;

        let (liked, disliked) = match actor {
            Actor::Registered(_) => (liked_by, disliked_by),
            Actor::Anonymous(_) => (liked_by_anonymous, disliked_by_anonymous),
        };
        let (wanted, wanted_count, opposite, opposite_count) = match direction {
            VoteDirection::Like => (liked, likes, disliked, dislikes),
            VoteDirection::Dislike => (disliked, dislikes, liked, likes),
        };

        let key = actor.key();
        if wanted.contains(key) {
            return Err(AlreadyVoted(direction));
        }
        if opposite.remove(key) {
            *opposite_count = opposite_count.saturating_sub(1);
        }
        wanted.insert(key.to_string());
        *wanted_count += 1;

        Ok(self.tally())
    }
}
