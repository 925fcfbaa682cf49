use crate::model::{Entity, EntityKey, ScheduleIndex};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// Orders work by freshness: never-scraped entities first, then the ones
/// whose last successful update is oldest. Ties fall back to the identifier
/// ordering so the order is deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreshnessScheduler;

impl FreshnessScheduler {
    pub fn order(&self, entities: &[EntityKey], schedule: &ScheduleIndex) -> Vec<EntityKey> {
        let mut keyed: Vec<(Option<DateTime<Utc>>, &EntityKey)> = entities
            .iter()
            .map(|key| (schedule.get(key).copied(), key))
            .collect();
        // `None` sorts before `Some`, so unseen entities lead.
        keyed.sort();
        keyed.into_iter().map(|(_, key)| key.clone()).collect()
    }

    /// [`order`](Self::order) applied to full entities. Entities sharing a
    /// key keep their input order.
    pub fn order_entities(&self, entities: Vec<Entity>, schedule: &ScheduleIndex) -> Vec<Entity> {
        let keys: Vec<EntityKey> = entities.iter().map(|entity| entity.key.clone()).collect();
        let mut by_key: HashMap<EntityKey, VecDeque<Entity>> = HashMap::new();
        for entity in entities {
            by_key.entry(entity.key.clone()).or_default().push_back(entity);
        }
        self.order(&keys, schedule)
            .into_iter()
            .filter_map(|key| by_key.get_mut(&key).and_then(VecDeque::pop_front))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(bse: &str) -> EntityKey {
        EntityKey::new(Some(bse), None, None)
    }

    #[test]
    fn test_unseen_first_then_oldest() {
        let (a, b, c) = (key("300"), key("100"), key("200"));
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let schedule = ScheduleIndex::from([(b.clone(), t1), (c.clone(), t2)]);

        let ordered = FreshnessScheduler.order(&[c.clone(), b.clone(), a.clone()], &schedule);

        assert_eq!(ordered, vec![a, b, c]);
    }

    #[test]
    fn test_ties_are_broken_by_identifier() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = ScheduleIndex::from([(key("2"), t), (key("1"), t)]);

        let ordered = FreshnessScheduler.order(&[key("2"), key("1"), key("9"), key("3")], &schedule);

        assert_eq!(ordered, vec![key("3"), key("9"), key("1"), key("2")]);
    }

    #[test]
    fn test_order_entities_matches_order() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let seen = Entity::new(key("1"), "Seen", "all");
        let unseen = Entity::new(key("2"), "Unseen", "all");
        let schedule = ScheduleIndex::from([(key("1"), t)]);

        let ordered = FreshnessScheduler.order_entities(vec![seen, unseen], &schedule);

        assert_eq!(ordered[0].name, "Unseen");
        assert_eq!(ordered[1].name, "Seen");
    }

    #[test]
    fn test_order_entities_keeps_duplicates_in_input_order() {
        let first = Entity::new(key("5"), "First", "all");
        let second = Entity::new(key("5"), "Second", "all");
        let other = Entity::new(key("4"), "Other", "all");

        let ordered =
            FreshnessScheduler.order_entities(vec![first, second, other], &ScheduleIndex::new());

        let names: Vec<_> = ordered.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Other", "First", "Second"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(FreshnessScheduler
            .order(&[], &ScheduleIndex::new())
            .is_empty());
    }
}
