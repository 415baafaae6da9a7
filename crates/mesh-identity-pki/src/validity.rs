/*
 * Copyright Nitro Agility S.r.l.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Certificate validity policy.

use std::time::Duration;
use time::OffsetDateTime;

/// Default lifetime of issued end-entity certificates (24 hours)
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Default allowance for clock skew between the issuer and its peers
pub const DEFAULT_CLOCK_SKEW_ALLOWANCE: Duration = Duration::from_secs(20);

/// Longest end-entity lifetime accepted from configuration (ten years)
pub const MAX_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Largest clock skew allowance accepted from configuration (one day)
pub const MAX_CLOCK_SKEW_ALLOWANCE: Duration = Duration::from_secs(24 * 60 * 60);

/// Validity policy applied to every certificate a CA mints.
///
/// For an issuance at `now` the window is
/// `[now - skew, now + lifetime + skew]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    lifetime: Duration,
    clock_skew_allowance: Duration,
}

impl Validity {
    pub fn new(lifetime: Duration, clock_skew_allowance: Duration) -> Self {
        Self {
            lifetime,
            clock_skew_allowance,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn clock_skew_allowance(&self) -> Duration {
        self.clock_skew_allowance
    }

    /// Returns `(not_before, not_after)` for a certificate issued at `now`,
    /// or `None` if the window falls outside the representable date range.
    pub fn window(&self, now: OffsetDateTime) -> Option<(OffsetDateTime, OffsetDateTime)> {
        let skew = time::Duration::try_from(self.clock_skew_allowance).ok()?;
        let lifetime = time::Duration::try_from(self.lifetime).ok()?;
        let not_before = now.checked_sub(skew)?;
        let not_after = now.checked_add(lifetime)?.checked_add(skew)?;
        Some((not_before, not_after))
    }
}

impl Default for Validity {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME, DEFAULT_CLOCK_SKEW_ALLOWANCE)
    }
}
