use inventory_sqlite::Site;

use crate::SiteRequest;

/// Values substituted when the source record leaves a creation field empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub php_version: String,
    /// Template the site is created with; the real one is reconciled afterwards.
    pub vhost_template: String,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy { php_version: "7.4".to_string(), vhost_template: "Generic".to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    PhpVersion,
    User,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSite {
    pub request: SiteRequest,
    pub applied: Vec<Fallback>,
}

impl ResolvedSite {
    pub fn generated_password(&self) -> bool {
        self.applied.contains(&Fallback::Password)
    }
}

impl FallbackPolicy {
    /// Build the creation request for `site`. `password` is only called when
    /// the source record has none.
    pub fn resolve(&self, site: &Site, password: impl FnOnce() -> String) -> ResolvedSite {
        let mut applied = Vec::new();
        let php_version = match site.php_version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => {
                applied.push(Fallback::PhpVersion);
                self.php_version.clone()
            }
        };
        let site_user = match site.user.trim() {
            "" => {
                applied.push(Fallback::User);
                user_from_domain(&site.domain_name)
            }
            u => u.to_string(),
        };
        let site_user_password = if site.user_password.is_empty() {
            applied.push(Fallback::Password);
            password()
        } else {
            site.user_password.clone()
        };
        ResolvedSite {
            request: SiteRequest {
                domain: site.domain_name.clone(),
                php_version,
                vhost_template: self.vhost_template.clone(),
                site_user,
                site_user_password,
            },
            applied,
        }
    }
}

/// Derive a system account name from a domain: lowercase, dots to dashes,
/// other characters dropped, at most 32 bytes.
pub fn user_from_domain(domain: &str) -> String {
    let mut user: String = domain
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => Some(c),
            '.' | '_' => Some('-'),
            _ => None,
        })
        .collect();
    user.truncate(32);
    let user = user.trim_matches('-').to_string();
    if user.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        format!("u{}", user).chars().take(32).collect()
    } else {
        user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(php: Option<&str>, user: &str, pw: &str) -> Site {
        Site {
            id: 1,
            domain_name: "shop.example.com".into(),
            user: user.into(),
            user_password: pw.into(),
            php_version: php.map(str::to_string),
            vhost_template: Some("WooCommerce".into()),
            application: None,
            varnish_cache: None,
            site_type: "php".into(),
            root_directory: None,
        }
    }

    #[test]
    fn defaults_table() {
        let p = FallbackPolicy::default();
        assert_eq!(p.php_version, "7.4");
        assert_eq!(p.vhost_template, "Generic");
    }

    #[test]
    fn complete_record_uses_source_values() {
        let r = FallbackPolicy::default().resolve(&site(Some("8.1"), "shop", "pw"), || panic!("not needed"));
        assert!(r.applied.is_empty());
        assert_eq!(r.request.php_version, "8.1");
        assert_eq!(r.request.site_user, "shop");
        assert_eq!(r.request.site_user_password, "pw");
        assert_eq!(r.request.vhost_template, "Generic");
    }

    #[test]
    fn empty_fields_fall_back() {
        let r = FallbackPolicy::default().resolve(&site(Some(" "), "", ""), || "generated".to_string());
        assert_eq!(r.applied, vec![Fallback::PhpVersion, Fallback::User, Fallback::Password]);
        assert_eq!(r.request.php_version, "7.4");
        assert_eq!(r.request.site_user, "shop-example-com");
        assert_eq!(r.request.site_user_password, "generated");
        assert!(r.generated_password());
    }

    #[test]
    fn user_names() {
        assert_eq!(user_from_domain("A.Example.com"), "a-example-com");
        assert_eq!(user_from_domain("123.example.com"), "u123-example-com");
        let long = user_from_domain("averyveryverylongsubdomainname.example.com");
        assert!(long.len() <= 32);
    }
}
