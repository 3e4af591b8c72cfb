// snapback is a rotating hard-link snapshot backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! When is a backup due, and which promotion tiers go with it.

use chrono::{DateTime, Datelike, Local, Weekday};

use crate::utils;

/// Inputs of the hourly schedule gate.
#[derive(Debug, Clone)]
pub struct GateInput {
    /// Configured hourly ring size, at least 1.
    pub hourlies: u64,
    /// Slot-0 mtime in epoch seconds; 0 when the slot does not exist.
    pub slot0_mtime: u64,
    /// Current time in epoch seconds.
    pub now: u64,
    /// Configured floor under the derived interval, in seconds.
    pub must_exceed_secs: u64,
    pub force: bool,
    pub auto_time: bool,
}

/// Decides whether a new hourly snapshot is due.
///
/// With `hourlies` per day the natural interval is `24/H` hours; half an
/// hour of slack keeps a cron job that drifts slightly early from being
/// skipped. `MustExceed` raises the threshold but never lowers it. Forced
/// runs and disabled auto-time always proceed; a missing slot 0 (mtime 0)
/// is older than any threshold.
pub fn is_due(gate: &GateInput) -> bool {
    if gate.force || !gate.auto_time {
        return true;
    }

    let derived = (24.0 / gate.hourlies as f64 - 0.5) * 3600.0;
    let must_exceed = derived.max(gate.must_exceed_secs as f64);
    let age = gate.now.saturating_sub(gate.slot0_mtime) as f64;

    age > must_exceed
}

/// Which promotion tiers accompany this hourly pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFlags {
    pub dailies: bool,
    pub weeklies: bool,
    pub monthlies: bool,
}

/// Derives the promotion flags from the previous slot-0 mtime.
///
/// Dailies fire on the first run of a new day (the day-of-year changed
/// since the last completed hourly, or there has never been one). Weeklies
/// additionally need a Sunday, monthlies the first of the month.
pub fn calendar_flags(slot0_mtime: u64, now: &DateTime<Local>) -> CalendarFlags {
    let dailies = if slot0_mtime == 0 {
        true
    } else {
        utils::local_from_epoch(slot0_mtime).ordinal() != now.ordinal()
    };

    CalendarFlags {
        dailies,
        weeklies: dailies && now.weekday() == Weekday::Sun,
        monthlies: dailies && now.day() == 1,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn gate(hourlies: u64, age_secs: u64, must_exceed: u64) -> GateInput {
        let now = 1_800_000_000;
        GateInput {
            hourlies,
            slot0_mtime: now - age_secs,
            now,
            must_exceed_secs: must_exceed,
            force: false,
            auto_time: true,
        }
    }

    #[test]
    fn test_gate_threshold_from_hourlies() {
        // Hourlies 4: threshold is (24/4 - 0.5) * 3600 = 19800 seconds.
        assert!(!is_due(&gate(4, 1800, 300)));
        assert!(!is_due(&gate(4, 19800, 300)));
        assert!(is_due(&gate(4, 19801, 300)));
    }

    #[test]
    fn test_gate_threshold_for_various_hourlies() {
        for hourlies in 1..=24 {
            let threshold = ((24.0 / hourlies as f64 - 0.5) * 3600.0) as u64;
            assert!(
                !is_due(&gate(hourlies, threshold, 0)),
                "H={hourlies}: at the threshold must skip"
            );
            assert!(
                is_due(&gate(hourlies, threshold + 2, 0)),
                "H={hourlies}: past the threshold must proceed"
            );
        }
    }

    #[test]
    fn test_must_exceed_raises_but_never_lowers() {
        // 24 hourlies derive a 1800s threshold; MustExceed 1h wins.
        assert!(!is_due(&gate(24, 3000, 3600)));
        assert!(is_due(&gate(24, 3601, 3600)));

        // A MustExceed below the derived threshold changes nothing.
        assert!(!is_due(&gate(4, 3601, 3600)));
    }

    #[test]
    fn test_force_and_auto_time_bypass() {
        let mut g = gate(4, 60, 300);
        g.force = true;
        assert!(is_due(&g));

        let mut g = gate(4, 60, 300);
        g.auto_time = false;
        assert!(is_due(&g));
    }

    #[test]
    fn test_missing_slot_always_proceeds() {
        let g = GateInput {
            hourlies: 1,
            slot0_mtime: 0,
            now: 1_800_000_000,
            must_exceed_secs: 86400,
            force: false,
            auto_time: true,
        };
        assert!(is_due(&g));
    }

    #[test]
    fn test_dailies_on_day_change() {
        let yesterday = Local.with_ymd_and_hms(2025, 6, 10, 23, 0, 0).unwrap();
        let today = Local.with_ymd_and_hms(2025, 6, 11, 1, 0, 0).unwrap();

        let flags = calendar_flags(yesterday.timestamp() as u64, &today);
        assert!(flags.dailies);

        let same_day = Local.with_ymd_and_hms(2025, 6, 11, 8, 0, 0).unwrap();
        let flags = calendar_flags(today.timestamp() as u64, &same_day);
        assert_eq!(
            flags,
            CalendarFlags {
                dailies: false,
                weeklies: false,
                monthlies: false
            }
        );
    }

    #[test]
    fn test_weeklies_require_sunday() {
        let saturday = Local.with_ymd_and_hms(2025, 6, 14, 3, 0, 0).unwrap();
        let sunday = Local.with_ymd_and_hms(2025, 6, 15, 3, 0, 0).unwrap();

        let flags = calendar_flags(saturday.timestamp() as u64, &sunday);
        assert!(flags.dailies);
        assert!(flags.weeklies);
        assert!(!flags.monthlies);
    }

    #[test]
    fn test_monthlies_require_first_of_month() {
        let last_of_june = Local.with_ymd_and_hms(2025, 6, 30, 22, 0, 0).unwrap();
        let first_of_july = Local.with_ymd_and_hms(2025, 7, 1, 2, 0, 0).unwrap();

        let flags = calendar_flags(last_of_june.timestamp() as u64, &first_of_july);
        assert!(flags.dailies);
        assert!(flags.monthlies);
    }

    #[test]
    fn test_weeklies_and_monthlies_imply_dailies() {
        // Never-backed-up directory on an arbitrary day.
        let now = Local.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
        let flags = calendar_flags(0, &now);
        assert!(flags.dailies);
        if flags.weeklies || flags.monthlies {
            assert!(flags.dailies);
        }
    }
}
