use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, warn};

use crate::config::model::ClientSpec;

pub mod window;

/// One managed VM and its in-memory scheduling state.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub spec: ClientSpec,
    /// Epoch zero until the client is first selected.
    pub last_backup: NaiveDateTime,
    pub next_backup: Option<NaiveDateTime>,
}

impl ClientState {
    pub fn new(spec: ClientSpec) -> Self {
        Self {
            spec,
            last_backup: NaiveDateTime::default(),
            next_backup: None,
        }
    }
}

/// The set of clients for the life of the process, keyed by VM name.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, ClientState>,
}

impl ClientRegistry {
    pub fn new(specs: Vec<ClientSpec>) -> Self {
        let clients = specs
            .into_iter()
            .map(|spec| (spec.name.clone(), ClientState::new(spec)))
            .collect();
        Self { clients }
    }

    pub fn get(&self, name: &str) -> Option<&ClientState> {
        self.clients.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients in processing order: priority, then name.
    pub fn ordered(&self) -> Vec<&ClientState> {
        let mut list: Vec<&ClientState> = self.clients.values().collect();
        list.sort_by(|a, b| {
            (a.spec.priority, &a.spec.name).cmp(&(b.spec.priority, &b.spec.name))
        });
        list
    }
}

/// Decides which clients run now and in what order.
///
/// With an explicit list only the named clients are selected, all window
/// checks are bypassed and only their `last_backup` is touched. Otherwise each
/// client's weekday and day-of-month filters are applied and its watermark is
/// consulted; an eligible watermark advances by exactly one day from its
/// previous value.
pub fn select_due(
    registry: &mut ClientRegistry,
    now: NaiveDateTime,
    explicit: Option<&[String]>,
) -> Vec<String> {
    let mut due = Vec::new();

    if let Some(names) = explicit {
        for name in names {
            match registry.clients.get_mut(name) {
                Some(state) => {
                    state.last_backup = now;
                    if !due.contains(name) {
                        due.push(name.clone());
                    }
                }
                None => warn!("client {} is not configured; ignoring", name),
            }
        }
    } else {
        let today = now.date();
        for state in registry.clients.values_mut() {
            let window = &state.spec.window;
            if !window.weekday_allowed(today) {
                debug!("skipping {} due to wrong weekday", state.spec.name);
                continue;
            }
            if !window.day_of_month_allowed(today) {
                debug!("skipping {} due to wrong day of month", state.spec.name);
                continue;
            }
            let next = match state.next_backup {
                Some(next) => next,
                None => {
                    let first = window.first_watermark(now);
                    debug!("next backup of {} set to {}", state.spec.name, first);
                    state.next_backup = Some(first);
                    first
                }
            };
            if now < next {
                continue;
            }
            state.next_backup = Some(next + Duration::days(1));
            state.last_backup = now;
            due.push(state.spec.name.clone());
        }
    }

    due.sort_by(|a, b| {
        let pa = registry.clients.get(a).map(|s| s.spec.priority);
        let pb = registry.clients.get(b).map(|s| s.spec.priority);
        (pa, a).cmp(&(pb, b))
    });
    due
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::window::{parse_days_of_month, parse_weekdays, ScheduleWindow};
    use crate::config::model::Scalar;
    use crate::types::Method;
    use chrono::{NaiveDate, NaiveTime};

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    fn client(name: &str, priority: u8, hhmm: (u32, u32)) -> ClientSpec {
        ClientSpec {
            name: name.to_string(),
            priority,
            method: Method::Suspend,
            retention: 3,
            window: ScheduleWindow::daily(NaiveTime::from_hms_opt(hhmm.0, hhmm.1, 0).unwrap()),
        }
    }

    #[test]
    fn weekday_filter_leaves_watermark_alone() {
        // 2024-05-07 is a Tuesday.
        let mut spec = client("web", 10, (1, 0));
        spec.window.weekdays = Some(parse_weekdays("mon,wed").unwrap());
        let mut registry = ClientRegistry::new(vec![spec]);
        let due = select_due(&mut registry, at(2024, 5, 7, 12, 0), None);
        assert!(due.is_empty());
        let state = registry.get("web").unwrap();
        assert_eq!(state.next_backup, None);
        assert_eq!(state.last_backup, NaiveDateTime::default());
    }

    #[test]
    fn day_of_month_filter_skips_other_days() {
        let mut spec = client("db", 10, (1, 0));
        spec.window.days_of_month = Some(parse_days_of_month(&Scalar::Text("1,15".into())).unwrap());
        let mut registry = ClientRegistry::new(vec![spec]);
        assert!(select_due(&mut registry, at(2024, 5, 7, 12, 0), None).is_empty());
        assert_eq!(registry.get("db").unwrap().next_backup, None);

        // First look on an allowed day only sets the watermark.
        assert!(select_due(&mut registry, at(2024, 5, 15, 0, 30), None).is_empty());
        assert_eq!(registry.get("db").unwrap().next_backup, Some(at(2024, 5, 15, 1, 0)));
        assert_eq!(select_due(&mut registry, at(2024, 5, 15, 1, 0), None), vec!["db"]);
    }

    #[test]
    fn first_evaluation_sets_watermark_without_running() {
        let mut registry = ClientRegistry::new(vec![client("a", 50, (23, 0))]);
        assert!(select_due(&mut registry, at(2024, 5, 7, 22, 0), None).is_empty());
        assert_eq!(registry.get("a").unwrap().next_backup, Some(at(2024, 5, 7, 23, 0)));

        let mut late = ClientRegistry::new(vec![client("a", 50, (23, 0))]);
        assert!(select_due(&mut late, at(2024, 5, 7, 23, 15), None).is_empty());
        assert_eq!(late.get("a").unwrap().next_backup, Some(at(2024, 5, 8, 23, 0)));
    }

    #[test]
    fn eligible_watermark_advances_from_previous_value() {
        let mut registry = ClientRegistry::new(vec![client("a", 50, (23, 0))]);
        select_due(&mut registry, at(2024, 5, 7, 22, 0), None);

        // Evaluated late: the watermark still moves exactly one day.
        let now = at(2024, 5, 8, 2, 17);
        assert_eq!(select_due(&mut registry, now, None), vec!["a"]);
        let state = registry.get("a").unwrap();
        assert_eq!(state.next_backup, Some(at(2024, 5, 8, 23, 0)));
        assert_eq!(state.last_backup, now);

        assert!(select_due(&mut registry, at(2024, 5, 8, 3, 17), None).is_empty());
    }

    #[test]
    fn due_clients_ordered_by_priority_then_name() {
        let mut registry = ClientRegistry::new(vec![
            client("zeta", 5, (1, 0)),
            client("beta", 20, (1, 0)),
            client("alpha", 20, (1, 0)),
            client("omega", 99, (1, 0)),
        ]);
        select_due(&mut registry, at(2024, 5, 7, 0, 0), None);
        let due = select_due(&mut registry, at(2024, 5, 7, 1, 0), None);
        assert_eq!(due, vec!["zeta", "alpha", "beta", "omega"]);
    }

    #[test]
    fn explicit_list_bypasses_windows_and_leaves_others_untouched() {
        let mut filtered = client("web", 10, (23, 0));
        filtered.window.weekdays = Some(parse_weekdays("sun").unwrap());
        let mut registry = ClientRegistry::new(vec![
            filtered,
            client("db", 1, (23, 0)),
            client("mail", 2, (0, 0)),
        ]);
        let now = at(2024, 5, 7, 12, 0);
        let names = vec!["web".to_string(), "db".to_string(), "ghost".to_string()];
        let due = select_due(&mut registry, now, Some(names.as_slice()));
        assert_eq!(due, vec!["db", "web"]);

        let web = registry.get("web").unwrap();
        assert_eq!(web.last_backup, now);
        assert_eq!(web.next_backup, None);
        let mail = registry.get("mail").unwrap();
        assert_eq!(mail.last_backup, NaiveDateTime::default());
        assert_eq!(mail.next_backup, None);
    }
}
