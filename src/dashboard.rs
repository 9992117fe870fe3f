//! Read-only views over a learner's progress joined with the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::models::{
    Course, EnrollmentRecord, EnrollmentStatus, Lab, LabRunRecord, RegionCode, RegionPrice, UserProfile,
};
use crate::progress::composite_key;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Badge {
    NotStarted,
    InProgress,
    Completed,
    Cancelled,
}

pub fn enrollment_badge(r: &EnrollmentRecord) -> Badge {
    match r.status {
        EnrollmentStatus::Cancelled => Badge::Cancelled,
        EnrollmentStatus::Completed => Badge::Completed,
        _ if r.progress == 0 => Badge::NotStarted,
        _ => Badge::InProgress,
    }
}

pub fn lab_badge(r: &LabRunRecord) -> Badge {
    if r.is_completed() {
        Badge::Completed
    } else if r.progress == 0 {
        Badge::NotStarted
    } else {
        Badge::InProgress
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Recent,
    Progress,
    Title,
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentCard {
    pub course_id: String,
    pub course_slug: Option<String>,
    pub title: String,
    pub status: EnrollmentStatus,
    pub progress: u8,
    pub badge: Badge,
    pub current_lesson_id: Option<String>,
    /// First lesson in course order that is not completed yet.
    pub next_lesson_id: Option<String>,
    pub total_lessons: Option<usize>,
    pub price: Option<RegionPrice>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabCard {
    pub lab_id: String,
    pub lab_slug: Option<String>,
    pub title: String,
    pub progress: u8,
    pub badge: Badge,
    pub active_step_index: usize,
    pub total_steps: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub labs_in_progress: usize,
    pub labs_completed: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub learner_id: String,
    pub summary: Summary,
    pub enrollments: Vec<EnrollmentCard>,
    pub labs: Vec<LabCard>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: Uuid,
    pub course_id: String,
    pub course_title: String,
    pub learner_name: String,
    pub issued_at: DateTime<Utc>,
}

/// Looks a course up by id, falling back to slug.
pub fn find_course<'a>(courses: &'a [Course], id: &str) -> Option<&'a Course> {
    courses.iter().find(|c| c.id == id || c.slug == id)
}

fn find_lab<'a>(labs: &'a [Lab], id: &str) -> Option<&'a Lab> {
    labs.iter().find(|l| l.id == id || l.slug == id)
}

pub fn enrollment_card(r: &EnrollmentRecord, courses: &[Course], region: RegionCode) -> EnrollmentCard {
    let course = find_course(courses, &r.course_id);
    let next_lesson_id = course.and_then(|c| {
        c.lesson_ids()
            .into_iter()
            .find(|id| !r.completed_lesson_ids.contains(*id))
            .map(str::to_owned)
    });
    EnrollmentCard {
        course_id: r.course_id.clone(),
        course_slug: course.map(|c| c.slug.clone()),
        title: course.map_or_else(|| r.course_id.clone(), |c| c.title.clone()),
        status: r.status,
        progress: r.progress,
        badge: enrollment_badge(r),
        current_lesson_id: r.current_lesson_id.clone(),
        next_lesson_id,
        total_lessons: course.map(Course::total_lessons),
        price: course.and_then(|c| c.price_for(region)).cloned(),
        started_at: r.started_at,
        completed_at: r.completed_at,
    }
}

pub fn lab_card(r: &LabRunRecord, labs: &[Lab]) -> LabCard {
    let lab = find_lab(labs, &r.lab_id);
    LabCard {
        lab_id: r.lab_id.clone(),
        lab_slug: lab.map(|l| l.slug.clone()),
        title: lab.map_or_else(|| r.lab_id.clone(), |l| l.title.clone()),
        progress: r.progress,
        badge: lab_badge(r),
        active_step_index: r.active_step_index,
        total_steps: lab.map(Lab::total_steps),
        started_at: r.started_at,
        completed_at: r.completed_at,
    }
}

fn summarize(enrollments: &[EnrollmentRecord], runs: &[LabRunRecord]) -> Summary {
    let mut s = Summary::default();
    for r in enrollments {
        match r.status {
            EnrollmentStatus::Active => s.active += 1,
            EnrollmentStatus::Paused => s.paused += 1,
            EnrollmentStatus::Completed => s.completed += 1,
            EnrollmentStatus::Cancelled => s.cancelled += 1,
        }
    }
    for r in runs {
        if r.is_completed() {
            s.labs_completed += 1;
        } else {
            s.labs_in_progress += 1;
        }
    }
    s
}

fn sort_cards(cards: &mut [EnrollmentCard], sort: SortKey) {
    match sort {
        SortKey::Recent => cards.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.course_id.cmp(&b.course_id))
        }),
        SortKey::Progress => cards.sort_by(|a, b| {
            b.progress
                .cmp(&a.progress)
                .then_with(|| a.course_id.cmp(&b.course_id))
        }),
        SortKey::Title => cards.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.course_id.cmp(&b.course_id))
        }),
    }
}

/// Which enrollment cards to show and how to price and order them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardQuery {
    pub filter: Option<EnrollmentStatus>,
    pub sort: SortKey,
    pub region: RegionCode,
}

/// Builds the dashboard. The summary always counts every record; the query
/// filter only narrows the enrollment cards.
pub fn build_dashboard(
    learner_id: &str,
    enrollments: &[EnrollmentRecord],
    runs: &[LabRunRecord],
    courses: &[Course],
    labs: &[Lab],
    query: DashboardQuery,
) -> Dashboard {
    let mut cards: Vec<EnrollmentCard> = enrollments
        .iter()
        .filter(|r| query.filter.is_none() || query.filter == Some(r.status))
        .map(|r| enrollment_card(r, courses, query.region))
        .collect();
    sort_cards(&mut cards, query.sort);

    let mut lab_cards: Vec<LabCard> = runs.iter().map(|r| lab_card(r, labs)).collect();
    lab_cards.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.lab_id.cmp(&b.lab_id)));

    Dashboard {
        learner_id: learner_id.to_owned(),
        summary: summarize(enrollments, runs),
        enrollments: cards,
        labs: lab_cards,
    }
}

/// One certificate per completed enrollment, newest first. Ids are stable
/// for a given learner and course.
pub fn certificates(user: &UserProfile, enrollments: &[EnrollmentRecord], courses: &[Course]) -> Vec<Certificate> {
    let mut out: Vec<Certificate> = enrollments
        .iter()
        .filter(|r| r.learner_id == user.id && r.status == EnrollmentStatus::Completed)
        .filter_map(|r| {
            let issued_at = r.completed_at?;
            let key = composite_key(&r.learner_id, &r.course_id);
            Some(Certificate {
                id: Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()),
                course_id: r.course_id.clone(),
                course_title: find_course(courses, &r.course_id)
                    .map_or_else(|| r.course_id.clone(), |c| c.title.clone()),
                learner_name: user.name.clone(),
                issued_at,
            })
        })
        .collect();
    out.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then_with(|| a.course_id.cmp(&b.course_id)));
    out
}
