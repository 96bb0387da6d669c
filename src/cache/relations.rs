//! Entity types whose cached entries are invalidated together

use super::EntityType;

/// Entity types that must also be invalidated when `entity` changes.
///
/// Encodes the joins between entities (a course embeds its runs and cycle,
/// a run embeds its course and enrollment counts) without the cache layer
/// knowing the schema.
pub fn related(entity: EntityType) -> &'static [EntityType] {
    match entity {
        EntityType::Courses => &[EntityType::CourseRuns, EntityType::Cycles],
        EntityType::CourseRuns => &[EntityType::Courses, EntityType::Enrollments],
        EntityType::Cycles => &[EntityType::Courses],
        EntityType::Campuses => &[EntityType::CourseRuns],
        EntityType::Areas => &[EntityType::Courses],
        EntityType::Enrollments => &[EntityType::CourseRuns],
        EntityType::Leads | EntityType::Users | EntityType::AuditLogs => &[],
    }
}
