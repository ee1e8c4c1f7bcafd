//! Bulk reconciliation of a customer's monitor list: validate the submitted
//! entries against the customer's capabilities, diff them against existing
//! host/scheme and monitor rows, write the minimum change set, sweep
//! orphans, and enqueue one debounced reconfiguration push.

use crate::scheduler::SchedulerHandle;
use models::{
    slug_of, ContentCheckMode, CustomerCapabilities, CustomerId, HostScheme, HostSchemeId,
    HttpMethod, Monitor, MonitorId, PostContentType,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One submitted monitor row, already JSON-decoded by the REST adapter.
#[derive(Debug, Clone)]
pub struct MonitorEntry {
    pub user_ordering: u16,
    pub uri: String,
    pub method: HttpMethod,
    pub content_check_mode: ContentCheckMode,
    pub keywords: Vec<Vec<u8>>,
    pub post_content_type: PostContentType,
    pub post_user_agent: String,
    pub post_content: Vec<u8>,
}

/// A rejected entry, keyed by the user ordering it arrived with.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EntryError {
    pub user_ordering: u16,
    pub message: String,
}

impl EntryError {
    fn new(user_ordering: u16, message: impl Into<String>) -> Self {
        EntryError {
            user_ordering,
            message: message.into(),
        }
    }
}

/// Ordering used for errors that have no originating entry (sweep failures).
const SWEEP_ORDERING: u16 = u16::MAX;

/// A validated entry with its compacted ordering. `origin` is None for
/// relative entries, which inherit their predecessor's host/scheme.
#[derive(Debug, Clone)]
struct ValidEntry {
    ordering: u16,
    origin: Option<url::Url>,
    slug: String,
    method: HttpMethod,
    content_check_mode: ContentCheckMode,
    keywords: Vec<Vec<u8>>,
    post_content_type: PostContentType,
    post_user_agent: String,
    post_content: Vec<u8>,
}

/// Splits an entry URI into its origin (None when relative) and slug.
fn parse_entry_uri(raw: &str) -> Result<(Option<url::Url>, String), String> {
    if raw.contains("://") {
        let url = url::Url::parse(raw)
            .map_err(|_| "must include both host and scheme or just path".to_string())?;
        if url.host_str().unwrap_or("").is_empty() {
            return Err("must include both host and scheme or just path".to_string());
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err("user authentication is not supported".to_string());
        }
        if url.fragment().is_some() {
            return Err("fragments are not supported".to_string());
        }

        let slug = slug_of(url.path(), url.query());

        let mut origin = url;
        origin.set_path("");
        origin.set_query(None);
        HostScheme::parse_url(origin.as_str()).map_err(|err| err.to_string())?;

        Ok((Some(origin), slug))
    } else {
        if raw.contains('#') {
            return Err("fragments are not supported".to_string());
        }
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw, None),
        };
        if path.is_empty() {
            return Err("must include both host and scheme or just path".to_string());
        }

        Ok((None, slug_of(path, query)))
    }
}

/// Validation stage: rejects bad entries with per-entry errors, sorts the
/// survivors by submitted ordering, and assigns compact orderings from 0.
fn validate_and_sort(
    capabilities: &CustomerCapabilities,
    entries: &[MonitorEntry],
) -> Result<Vec<ValidEntry>, Vec<EntryError>> {
    let mut errors = Vec::new();
    let mut sorted: BTreeMap<u16, ValidEntry> = BTreeMap::new();

    for entry in entries {
        let ordering = entry.user_ordering;
        if sorted.contains_key(&ordering) {
            errors.push(EntryError::new(ordering, "duplicate user ordering value"));
            continue;
        }

        let (origin, slug) = match parse_entry_uri(&entry.uri) {
            Ok(parsed) => parsed,
            Err(message) => {
                errors.push(EntryError::new(ordering, message));
                continue;
            }
        };

        if entry.method == HttpMethod::Post && !capabilities.supports_post_method {
            errors.push(EntryError::new(ordering, "POST method not supported"));
            continue;
        }
        if entry.content_check_mode.uses_content_match()
            && !capabilities.supports_content_checking
        {
            errors.push(EntryError::new(
                ordering,
                "Content match checking not supported",
            ));
            continue;
        }
        if entry.content_check_mode.uses_keywords() && !capabilities.supports_keyword_checking {
            errors.push(EntryError::new(ordering, "Keyword checking not supported"));
            continue;
        }

        sorted.insert(
            ordering,
            ValidEntry {
                ordering,
                origin,
                slug,
                method: entry.method,
                content_check_mode: entry.content_check_mode,
                keywords: entry.keywords.clone(),
                post_content_type: entry.post_content_type,
                post_user_agent: entry.post_user_agent.clone(),
                post_content: entry.post_content.clone(),
            },
        );
    }

    if let Some((&first_ordering, first)) = sorted.iter().next() {
        if first.origin.is_none() {
            errors.push(EntryError::new(
                first_ordering,
                "first entry must include scheme and host",
            ));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(sorted
        .into_values()
        .enumerate()
        .map(|(index, mut entry)| {
            entry.ordering = index as u16;
            entry
        })
        .collect())
}

/// Applies a full monitor-list update for one customer. Errors accumulate
/// per entry; past validation the batch is best-effort.
pub async fn update_monitors(
    pool: &sqlx::PgPool,
    scheduler: &SchedulerHandle,
    capabilities: &CustomerCapabilities,
    entries: Vec<MonitorEntry>,
) -> Vec<EntryError> {
    let customer_id = capabilities.customer_id;
    let mut errors = Vec::new();

    if entries.is_empty() {
        match delete_customer(pool, scheduler, customer_id).await {
            Ok(()) => (),
            Err(error) => {
                tracing::error!(%customer_id, %error, "failed to delete customer monitors");
                errors.push(EntryError::new(0, "could not delete existing monitors"));
            }
        }
    } else {
        let valid = match validate_and_sort(capabilities, &entries) {
            Ok(valid) => valid,
            Err(errors) => return errors,
        };

        match apply_entries(pool, capabilities, valid, &mut errors).await {
            Ok(()) => (),
            Err(error) => {
                tracing::error!(%customer_id, %error, "monitor reconciliation failed");
                errors.push(EntryError::new(SWEEP_ORDERING, "internal error"));
            }
        }
    }

    if errors.is_empty() {
        scheduler.schedule(customer_id, !capabilities.customer_active);
    }

    errors
}

async fn apply_entries(
    pool: &sqlx::PgPool,
    capabilities: &CustomerCapabilities,
    entries: Vec<ValidEntry>,
    errors: &mut Vec<EntryError>,
) -> anyhow::Result<()> {
    let customer_id = capabilities.customer_id;

    let existing_host_schemes =
        overseer_sql::host_schemes::fetch_host_schemes(pool, Some(customer_id)).await?;
    let existing_monitors = overseer_sql::monitors::fetch_monitors(pool, Some(customer_id)).await?;

    let mut host_schemes_by_origin: HashMap<(String, String), HostScheme> = existing_host_schemes
        .iter()
        .map(|host_scheme| {
            (
                HostScheme::origin_key(&host_scheme.url),
                host_scheme.clone(),
            )
        })
        .collect();
    let mut monitors_by_location: HashMap<(HostSchemeId, String), Monitor> = existing_monitors
        .into_iter()
        .map(|monitor| ((monitor.host_scheme_id, monitor.path.clone()), monitor))
        .collect();

    let mut used_host_schemes: BTreeSet<HostSchemeId> = BTreeSet::new();
    let mut previous_host_scheme: Option<HostSchemeId> = None;

    for entry in entries {
        let host_scheme_id = match &entry.origin {
            None => match previous_host_scheme {
                Some(host_scheme_id) => Some(host_scheme_id),
                None => {
                    // Predecessor creation failed; nothing to attach to.
                    errors.push(EntryError::new(
                        entry.ordering,
                        "failed to create monitor entry",
                    ));
                    None
                }
            },
            Some(origin) => {
                let key = HostScheme::origin_key(origin);
                match host_schemes_by_origin.get(&key) {
                    Some(host_scheme) => Some(host_scheme.id),
                    None => {
                        match overseer_sql::host_schemes::create_host_scheme(
                            pool,
                            customer_id,
                            origin,
                        )
                        .await
                        {
                            Ok(host_scheme) => {
                                let host_scheme_id = host_scheme.id;
                                host_schemes_by_origin.insert(key, host_scheme);
                                Some(host_scheme_id)
                            }
                            Err(error) => {
                                tracing::error!(%customer_id, %error, "failed to create host/scheme");
                                errors.push(EntryError::new(
                                    entry.ordering,
                                    "failed to create monitor entry",
                                ));
                                None
                            }
                        }
                    }
                }
            }
        };
        previous_host_scheme = host_scheme_id;

        let Some(host_scheme_id) = host_scheme_id else {
            continue;
        };
        used_host_schemes.insert(host_scheme_id);

        let location = (host_scheme_id, entry.slug.clone());
        match monitors_by_location.remove(&location) {
            Some(existing) => {
                let updated = Monitor {
                    user_ordering: entry.ordering,
                    path: entry.slug.clone(),
                    method: entry.method,
                    content_check_mode: entry.content_check_mode,
                    keywords: entry.keywords.clone(),
                    post_content_type: entry.post_content_type,
                    post_user_agent: entry.post_user_agent.clone(),
                    post_content: entry.post_content.clone(),
                    ..existing.clone()
                };
                if updated != existing {
                    match overseer_sql::monitors::update_monitor(pool, &updated).await {
                        Ok(true) => (),
                        Ok(false) | Err(_) => {
                            errors.push(EntryError::new(
                                entry.ordering,
                                "failed to update monitor settings",
                            ));
                        }
                    }
                }
            }
            None => {
                let monitor = Monitor {
                    id: MonitorId::INVALID,
                    customer_id,
                    host_scheme_id,
                    user_ordering: entry.ordering,
                    path: entry.slug.clone(),
                    method: entry.method,
                    content_check_mode: entry.content_check_mode,
                    keywords: entry.keywords,
                    post_content_type: entry.post_content_type,
                    post_user_agent: entry.post_user_agent,
                    post_content: entry.post_content,
                };
                if let Err(error) = overseer_sql::monitors::create_monitor(pool, &monitor).await {
                    tracing::error!(%customer_id, %error, "failed to create monitor");
                    errors.push(EntryError::new(
                        entry.ordering,
                        "failed to create monitor entry",
                    ));
                }
            }
        }
    }

    // Sweep: monitors no surviving entry claimed...
    for monitor in monitors_by_location.values() {
        match overseer_sql::monitors::delete_monitor(pool, monitor.id).await {
            Ok(_) => (),
            Err(error) => {
                tracing::error!(monitor_id = %monitor.id, %error, "failed to delete monitor");
                errors.push(EntryError::new(
                    monitor.user_ordering,
                    "failed to delete unused monitor.",
                ));
            }
        }
    }

    // ...and host/schemes no entry references any more.
    for host_scheme in host_schemes_by_origin.values() {
        if used_host_schemes.contains(&host_scheme.id) {
            continue;
        }
        match overseer_sql::host_schemes::delete_host_scheme(pool, host_scheme.id).await {
            Ok(_) => (),
            Err(error) => {
                tracing::error!(host_scheme_id = %host_scheme.id, %error, "failed to delete host/scheme");
                errors.push(EntryError::new(
                    SWEEP_ORDERING,
                    format!("failed to delete host/scheme {}", host_scheme.url_str()),
                ));
            }
        }
    }

    Ok(())
}

/// Updates a host/scheme row and queues a reconfiguration of its customer.
pub async fn modify_host_scheme(
    pool: &sqlx::PgPool,
    scheduler: &SchedulerHandle,
    host_scheme: &HostScheme,
) -> anyhow::Result<()> {
    let updated = overseer_sql::host_schemes::update_host_scheme(pool, host_scheme).await?;
    anyhow::ensure!(updated, "host/scheme {} no longer exists", host_scheme.id);
    scheduler.schedule(host_scheme.customer_id, false);
    Ok(())
}

/// Deletes a monitor. The last monitor under a host/scheme takes the
/// host/scheme with it, upholding the no-orphan-host/scheme invariant.
pub async fn delete_monitor(
    pool: &sqlx::PgPool,
    scheduler: &SchedulerHandle,
    monitor: &Monitor,
) -> anyhow::Result<()> {
    let siblings =
        overseer_sql::monitors::fetch_monitors_under_host_scheme(pool, monitor.host_scheme_id)
            .await?;

    let deleted = if siblings.len() < 2 {
        overseer_sql::host_schemes::delete_host_scheme(pool, monitor.host_scheme_id).await?
    } else {
        overseer_sql::monitors::delete_monitor(pool, monitor.id).await?
    };
    anyhow::ensure!(deleted, "monitor {} no longer exists", monitor.id);

    scheduler.schedule(monitor.customer_id, false);
    Ok(())
}

/// Deletes a host/scheme (cascading its monitors) and queues a push.
pub async fn delete_host_scheme(
    pool: &sqlx::PgPool,
    scheduler: &SchedulerHandle,
    host_scheme: &HostScheme,
) -> anyhow::Result<()> {
    let deleted = overseer_sql::host_schemes::delete_host_scheme(pool, host_scheme.id).await?;
    anyhow::ensure!(deleted, "host/scheme {} no longer exists", host_scheme.id);
    scheduler.schedule(host_scheme.customer_id, false);
    Ok(())
}

/// Removes everything a customer owns under host/scheme, queueing a
/// deactivation push.
pub async fn delete_customer(
    pool: &sqlx::PgPool,
    scheduler: &SchedulerHandle,
    customer_id: CustomerId,
) -> anyhow::Result<()> {
    overseer_sql::host_schemes::delete_customer_host_schemes(pool, customer_id).await?;
    scheduler.schedule(customer_id, true);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(user_ordering: u16, uri: &str) -> MonitorEntry {
        MonitorEntry {
            user_ordering,
            uri: uri.to_string(),
            method: HttpMethod::Get,
            content_check_mode: ContentCheckMode::NoCheck,
            keywords: Vec::new(),
            post_content_type: PostContentType::Text,
            post_user_agent: String::new(),
            post_content: Vec::new(),
        }
    }

    fn capabilities() -> CustomerCapabilities {
        CustomerCapabilities {
            customer_id: CustomerId::new(7),
            supports_post_method: true,
            supports_content_checking: true,
            supports_keyword_checking: true,
            customer_active: true,
            ..CustomerCapabilities::default()
        }
    }

    #[test]
    fn orderings_collapse_to_a_compact_sequence() {
        let entries = vec![
            entry(12, "/c"),
            entry(3, "https://a.example/"),
            entry(7, "/b"),
        ];
        let valid = validate_and_sort(&capabilities(), &entries).unwrap();

        let orderings: Vec<u16> = valid.iter().map(|entry| entry.ordering).collect();
        assert_eq!(orderings, vec![0, 1, 2]);
        let slugs: Vec<&str> = valid.iter().map(|entry| entry.slug.as_str()).collect();
        assert_eq!(slugs, vec!["/", "/b", "/c"]);
    }

    #[test]
    fn duplicate_ordering_is_rejected() {
        let entries = vec![entry(0, "https://a.example/"), entry(0, "/b")];
        let errors = validate_and_sort(&capabilities(), &entries).unwrap_err();
        assert_eq!(
            errors,
            vec![EntryError::new(0, "duplicate user ordering value")]
        );
    }

    #[test]
    fn first_entry_must_be_fully_qualified() {
        let entries = vec![entry(0, "/relative"), entry(1, "https://a.example/")];
        let errors = validate_and_sort(&capabilities(), &entries).unwrap_err();
        assert_eq!(
            errors,
            vec![EntryError::new(0, "first entry must include scheme and host")]
        );
    }

    #[test]
    fn fragments_and_userinfo_are_rejected() {
        let entries = vec![
            entry(0, "https://a.example/#frag"),
            entry(1, "/path#frag"),
            entry(2, "https://user:pw@a.example/"),
        ];
        let errors = validate_and_sort(&capabilities(), &entries).unwrap_err();
        assert_eq!(
            errors,
            vec![
                EntryError::new(0, "fragments are not supported"),
                EntryError::new(1, "fragments are not supported"),
                EntryError::new(2, "user authentication is not supported"),
            ]
        );
    }

    #[test]
    fn capability_denials() {
        let mut no_post = capabilities();
        no_post.supports_post_method = false;
        let mut post_entry = entry(0, "https://a.example/");
        post_entry.method = HttpMethod::Post;
        assert_eq!(
            validate_and_sort(&no_post, &[post_entry]).unwrap_err(),
            vec![EntryError::new(0, "POST method not supported")]
        );

        let mut no_content = capabilities();
        no_content.supports_content_checking = false;
        let mut content_entry = entry(0, "https://a.example/");
        content_entry.content_check_mode = ContentCheckMode::SmartContentMatch;
        assert_eq!(
            validate_and_sort(&no_content, &[content_entry]).unwrap_err(),
            vec![EntryError::new(0, "Content match checking not supported")]
        );

        let mut no_keywords = capabilities();
        no_keywords.supports_keyword_checking = false;
        let mut keyword_entry = entry(0, "https://a.example/");
        keyword_entry.content_check_mode = ContentCheckMode::AllKeywords;
        assert_eq!(
            validate_and_sort(&no_keywords, &[keyword_entry]).unwrap_err(),
            vec![EntryError::new(0, "Keyword checking not supported")]
        );
    }

    #[test]
    fn entry_uris_split_into_origin_and_slug() {
        let (origin, slug) = parse_entry_uri("https://A.Example/search?q=1").unwrap();
        assert_eq!(origin.unwrap().as_str(), "https://a.example/");
        assert_eq!(slug, "/search/?q=1");

        let (origin, slug) = parse_entry_uri("https://a.example").unwrap();
        assert!(origin.is_some());
        assert_eq!(slug, "/");

        let (origin, slug) = parse_entry_uri("/about").unwrap();
        assert!(origin.is_none());
        assert_eq!(slug, "/about");

        let (_, slug) = parse_entry_uri("/list?page=2").unwrap();
        assert_eq!(slug, "/list/?page=2");

        assert!(parse_entry_uri("gopher://a.example/").is_err());
        assert!(parse_entry_uri("").is_err());
    }
}
