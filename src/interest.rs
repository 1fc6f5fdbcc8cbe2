//! Which devices the relay forwards readings for.

use crate::device::DeviceId;
use std::collections::BTreeSet;

/// The set of devices of interest.
///
/// `Automatic` accepts every discovered device. `Followed` accepts only its
/// members and is never empty: removing the last member falls back to
/// `Automatic`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InterestSet {
    #[default]
    Automatic,
    Followed(BTreeSet<DeviceId>),
}

impl InterestSet {
    /// Build an interest set from a persisted follow list. An empty list means automatic.
    pub fn from_followed<I>(devices: I) -> Self
    where
        I: IntoIterator<Item = DeviceId>,
    {
        let followed: BTreeSet<DeviceId> = devices.into_iter().collect();
        if followed.is_empty() {
            InterestSet::Automatic
        } else {
            InterestSet::Followed(followed)
        }
    }

    pub fn is_automatic(&self) -> bool {
        matches!(self, InterestSet::Automatic)
    }

    /// Whether readings from `device` should reach the rate limiter.
    pub fn accepts(&self, device: &DeviceId) -> bool {
        match self {
            InterestSet::Automatic => true,
            InterestSet::Followed(followed) => followed.contains(device),
        }
    }

    /// Start following `device`. Returns `false` if it was already followed.
    pub fn follow(&mut self, device: DeviceId) -> bool {
        match self {
            InterestSet::Automatic => {
                *self = InterestSet::Followed(BTreeSet::from([device]));
                true
            }
            InterestSet::Followed(followed) => followed.insert(device),
        }
    }

    /// Stop following `device`. Returns `false` if it was not followed.
    pub fn unfollow(&mut self, device: &DeviceId) -> bool {
        let InterestSet::Followed(followed) = self else {
            return false;
        };
        let removed = followed.remove(device);
        if followed.is_empty() {
            *self = InterestSet::Automatic;
        }
        removed
    }

    pub fn set_automatic(&mut self) {
        *self = InterestSet::Automatic;
    }

    /// Followed devices in sorted order; empty when automatic.
    pub fn followed(&self) -> Vec<DeviceId> {
        match self {
            InterestSet::Automatic => Vec::new(),
            InterestSet::Followed(followed) => followed.iter().cloned().collect(),
        }
    }

    /// Allow-list handed to the scanner, `None` meaning "every device".
    pub fn allow_list(&self) -> Option<Vec<DeviceId>> {
        match self {
            InterestSet::Automatic => None,
            InterestSet::Followed(_) => Some(self.followed()),
        }
    }
}
