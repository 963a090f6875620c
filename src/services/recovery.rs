use chrono::{NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[serde(rename = "pre-op")]
    PreOp,
    #[serde(rename = "post-op")]
    PostOp,
}

/// Where a patient stands relative to surgery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Recovery {
    pub phase: Phase,
    /// Whole days since surgery (negative while waiting for it). `None` when
    /// no surgery date is recorded.
    pub day: Option<i64>,
}

/// Today's calendar date in UTC. All day arithmetic runs on UTC dates.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Classify the recovery phase. Surgery day itself counts as post-op.
pub fn classify(surgery_date: Option<NaiveDate>, today: NaiveDate) -> Recovery {
    let Some(surgery) = surgery_date else {
        return Recovery { phase: Phase::PreOp, day: None };
    };

    let day = (today - surgery).num_days();
    let phase = if day >= 0 { Phase::PostOp } else { Phase::PreOp };
    Recovery { phase, day: Some(day) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn no_surgery_date_is_pre_op() {
        for today in ["2020-02-29", "2025-01-01", "2031-12-31"] {
            let r = classify(None, d(today));
            assert_eq!(r.phase, Phase::PreOp);
            assert_eq!(r.day, None);
        }
    }

    #[test]
    fn surgery_day_is_post_op_day_zero() {
        let r = classify(Some(d("2025-03-10")), d("2025-03-10"));
        assert_eq!(r, Recovery { phase: Phase::PostOp, day: Some(0) });
    }

    #[test]
    fn before_surgery_reports_negative_days() {
        let r = classify(Some(d("2025-03-10")), d("2025-03-03"));
        assert_eq!(r, Recovery { phase: Phase::PreOp, day: Some(-7) });
    }

    #[test]
    fn after_surgery_counts_whole_days() {
        let r = classify(Some(d("2024-12-30")), d("2025-01-02"));
        assert_eq!(r, Recovery { phase: Phase::PostOp, day: Some(3) });
    }

    #[test]
    fn day_is_monotonic_in_today() {
        let surgery = d("2025-06-15");
        let mut today = d("2025-05-01");
        let mut prev = classify(Some(surgery), today).day.unwrap();
        for _ in 0..120 {
            today += Duration::days(1);
            let next = classify(Some(surgery), today).day.unwrap();
            assert!(next >= prev);
            assert_eq!(next - prev, 1);
            prev = next;
        }
    }

    #[test]
    fn serializes_phase_with_hyphen() {
        let json = serde_json::to_value(classify(None, d("2025-01-01"))).unwrap();
        assert_eq!(json["phase"], "pre-op");
    }
}
