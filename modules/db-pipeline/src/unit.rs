use inventory_sqlite::DatabaseBinding;
use serde::Serialize;
use tracing::warn;

/// One database to move, with every user the source grants on it.
///
/// Dump, staging file and status marker are all keyed by database name, so a
/// database is exported and imported exactly once however many users it has.
/// `owner` is created together with the database; `extra_users` cannot be
/// created through the panel and are reported instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseUnit {
    pub domain_name: String,
    pub database_name: String,
    pub owner: String,
    pub extra_users: Vec<String>,
}

impl DatabaseUnit {
    pub fn users(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.owner.as_str()).chain(self.extra_users.iter().map(String::as_str))
    }
}

/// Fold per-user bindings into one unit per database name, in first-seen
/// order. The first user seen becomes the owner.
pub fn group_bindings<'a>(bindings: impl IntoIterator<Item = &'a DatabaseBinding>) -> Vec<DatabaseUnit> {
    let mut units: Vec<DatabaseUnit> = Vec::new();
    for b in bindings {
        match units.iter_mut().find(|u| u.database_name == b.database_name) {
            None => units.push(DatabaseUnit {
                domain_name: b.domain_name.clone(),
                database_name: b.database_name.clone(),
                owner: b.database_user.clone(),
                extra_users: Vec::new(),
            }),
            Some(unit) if unit.domain_name != b.domain_name => {
                warn!(
                    database = %b.database_name,
                    site = %b.domain_name,
                    owner_site = %unit.domain_name,
                    "database name already bound to another site, ignoring"
                );
            }
            Some(unit) => {
                if !unit.users().any(|u| u == b.database_user) {
                    unit.extra_users.push(b.database_user.clone());
                }
            }
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(site: &str, db: &str, user: &str) -> DatabaseBinding {
        DatabaseBinding { domain_name: site.into(), database_name: db.into(), database_user: user.into() }
    }

    #[test]
    fn users_of_one_database_share_a_unit() {
        let bindings = vec![
            b("a.example.com", "a_db", "a_user"),
            b("a.example.com", "a_db", "a_ro"),
            b("a.example.com", "a2_db", "a2_user"),
            b("a.example.com", "a_db", "a_ro"),
        ];
        let units = group_bindings(&bindings);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].database_name, "a_db");
        assert_eq!(units[0].owner, "a_user");
        assert_eq!(units[0].extra_users, vec!["a_ro".to_string()]);
        assert_eq!(units[1].database_name, "a2_db");
        assert!(units[1].extra_users.is_empty());
    }

    #[test]
    fn same_name_on_another_site_is_dropped() {
        let bindings = vec![b("a.example.com", "x_db", "a_user"), b("b.example.com", "x_db", "b_user")];
        let units = group_bindings(&bindings);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].domain_name, "a.example.com");
        assert!(units[0].extra_users.is_empty());
    }
}
