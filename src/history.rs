use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ClassRecord, HistoryEntry, ScoreDeltas, StudentRecord};

/// Fewer snapshots than this and a student has no trend to show.
pub const MIN_TREND_POINTS: usize = 2;

/// Applies `deltas` to every student in the class and records one snapshot each,
/// all stamped with the same `ts`. Returns the number of students touched.
pub fn adjust_class(class: &mut ClassRecord, deltas: &ScoreDeltas, ts: DateTime<Utc>) -> usize {
    for student in class.students.iter_mut() {
        student.e21cc = student.e21cc.adjusted(deltas);
        student.push_snapshot(ts);
    }
    class.students.len()
}

pub fn trend_eligible(student: &StudentRecord) -> bool {
    student.e21cc_history.len() >= MIN_TREND_POINTS
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTrend {
    pub student_id: String,
    pub name: String,
    pub points: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub ts: DateTime<Utc>,
    pub cait: f64,
    pub cci: f64,
    pub cgc: f64,
    pub student_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassTrend {
    pub class_id: String,
    pub students: Vec<StudentTrend>,
    pub class_average: Vec<TrendPoint>,
}

pub fn trend_for(class: &ClassRecord) -> ClassTrend {
    ClassTrend {
        class_id: class.id.clone(),
        students: student_trends(&class.students),
        class_average: class_trend(&class.students),
    }
}

pub fn student_trends(students: &[StudentRecord]) -> Vec<StudentTrend> {
    students
        .iter()
        .filter(|s| trend_eligible(s))
        .map(|s| {
            let mut points = s.e21cc_history.clone();
            points.sort_by_key(|p| p.ts);
            StudentTrend {
                student_id: s.id.clone(),
                name: s.name.clone(),
                points,
            }
        })
        .collect()
}

/// Class-level series: at every distinct snapshot time, the mean of each
/// eligible student's latest snapshot at or before that time.
pub fn class_trend(students: &[StudentRecord]) -> Vec<TrendPoint> {
    let histories: Vec<&[HistoryEntry]> = students
        .iter()
        .filter(|s| trend_eligible(s))
        .map(|s| s.e21cc_history.as_slice())
        .collect();

    let mut stamps: Vec<DateTime<Utc>> = histories
        .iter()
        .flat_map(|h| h.iter().map(|e| e.ts))
        .collect();
    stamps.sort();
    stamps.dedup();

    let mut points = Vec::with_capacity(stamps.len());
    for ts in stamps {
        let mut sums = (0u64, 0u64, 0u64);
        let mut count = 0usize;
        for history in &histories {
            // max_by_key keeps the last of equal stamps, i.e. the later push.
            let Some(latest) = history.iter().filter(|e| e.ts <= ts).max_by_key(|e| e.ts) else {
                continue;
            };
            sums.0 += latest.cait as u64;
            sums.1 += latest.cci as u64;
            sums.2 += latest.cgc as u64;
            count += 1;
        }
        if count == 0 {
            continue;
        }
        let n = count as f64;
        points.push(TrendPoint {
            ts,
            cait: sums.0 as f64 / n,
            cci: sums.1 as f64 / n,
            cgc: sums.2 as f64 / n,
            student_count: count,
        });
    }
    points
}
