//! `ldap3` backed connections

use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ldap3::adapters::{Adapter, PagedResults};
use ldap3::controls::RawControl;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, SearchEntry, SearchOptions, SearchStream};
use tracing::{debug, trace, warn};

use adquery_core::types::{AttributeMap, RawEntry, Scope};
use adquery_core::{
    ClientConfig, DirectoryError, DirectoryResult, RC_OTHER, RC_REFERRAL, RC_SUCCESS,
    SHOW_DELETED_OID,
};

use super::{DirectoryConnection, DirectoryConnector, SearchEvent, SearchEvents, SearchParams};

/// Connector for real LDAP / Active Directory servers
#[derive(Debug, Clone)]
pub struct LdapConnector {
    timeout: Duration,
    start_tls: bool,
    skip_tls_verify: bool,
}

impl LdapConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_seconds),
            start_tls: config.start_tls,
            skip_tls_verify: config.skip_tls_verify,
        }
    }

    fn settings(&self) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_starttls(self.start_tls)
            .set_no_tls_verify(self.skip_tls_verify)
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self, url: &str) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        debug!("Connecting to LDAP server: {}", url);
        let started = Instant::now();

        let (conn, ldap) = LdapConnAsync::with_settings(self.settings(), url)
            .await
            .map_err(|e| map_ldap_error(e, started))?;

        ldap3::drive!(conn);

        Ok(Box::new(LdapConnection {
            ldap,
            url: url.to_string(),
            opened: started,
        }))
    }
}

struct LdapConnection {
    ldap: Ldap,
    url: String,
    opened: Instant,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| map_ldap_error(e, self.opened))?;

        if result.rc != RC_SUCCESS {
            debug!("Bind as '{}' to {} failed with code {}", dn, self.url, result.rc);
            return Err(DirectoryError::from_result_code(result.rc, result.text));
        }

        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        params: &SearchParams,
    ) -> DirectoryResult<Box<dyn SearchEvents>> {
        let scope = match params.scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::One => ldap3::Scope::OneLevel,
            Scope::Sub => ldap3::Scope::Subtree,
        };

        self.ldap.with_search_options(
            SearchOptions::new()
                .sizelimit(params.size_limit)
                .timelimit(params.time_limit),
        );

        if params.show_deleted {
            self.ldap.with_controls(vec![RawControl {
                ctype: SHOW_DELETED_OID.to_string(),
                crit: true,
                val: None,
            }]);
        }

        let adapters: Vec<Box<dyn Adapter<'static, String, Vec<String>>>> =
            vec![Box::new(PagedResults::new(params.page_size))];

        trace!(
            "Opening search on {} base='{}' scope={:?}",
            self.url,
            base_dn,
            params.scope
        );

        let stream = self
            .ldap
            .streaming_search_with(
                adapters,
                base_dn,
                scope,
                &params.filter,
                params.attributes.clone(),
            )
            .await
            .map_err(|e| map_ldap_error(e, self.opened))?;

        Ok(Box::new(LdapSearchEvents {
            stream,
            opened: self.opened,
            finished: false,
        }))
    }

    async fn unbind(&mut self) -> DirectoryResult<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| map_ldap_error(e, self.opened))
    }
}

struct LdapSearchEvents {
    stream: SearchStream<'static, String, Vec<String>>,
    opened: Instant,
    finished: bool,
}

#[async_trait]
impl SearchEvents for LdapSearchEvents {
    async fn next(&mut self) -> DirectoryResult<Option<SearchEvent>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let next = self
                .stream
                .next()
                .await
                .map_err(|e| map_ldap_error(e, self.opened))?;

            match next {
                Some(entry) if entry.is_intermediate() => continue,
                Some(entry) if entry.is_ref() => {
                    return Ok(Some(SearchEvent::Reference(ldap3::parse_refs(entry.0))));
                }
                Some(entry) => {
                    return Ok(Some(SearchEvent::Entry(to_raw_entry(SearchEntry::construct(
                        entry,
                    )))));
                }
                None => {
                    self.finished = true;
                    let result = self.stream.finish().await;

                    return match result.rc {
                        RC_SUCCESS => Ok(None),
                        RC_REFERRAL if !result.refs.is_empty() => {
                            Ok(Some(SearchEvent::Reference(result.refs)))
                        }
                        rc => Err(DirectoryError::from_result_code(rc, result.text)),
                    };
                }
            }
        }
    }
}

/// Binary values are carried base64 encoded
fn to_raw_entry(entry: SearchEntry) -> RawEntry {
    let mut attributes: AttributeMap = entry.attrs.into_iter().collect();

    for (name, values) in entry.bin_attrs {
        let encoded = values.iter().map(|v| STANDARD.encode(v));
        attributes.entry(name).or_default().extend(encoded);
    }

    RawEntry {
        dn: entry.dn,
        attributes,
    }
}

fn map_io_error(source: io::Error, opened: Instant) -> DirectoryError {
    match source.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => DirectoryError::ConnectionReset(source.to_string()),
        io::ErrorKind::TimedOut => DirectoryError::Timeout {
            elapsed: opened.elapsed(),
        },
        _ => DirectoryError::Connection(source.to_string()),
    }
}

fn map_ldap_error(error: LdapError, opened: Instant) -> DirectoryError {
    match error {
        LdapError::Io { source } => map_io_error(source, opened),
        LdapError::Timeout { .. } => DirectoryError::Timeout {
            elapsed: opened.elapsed(),
        },
        LdapError::LdapResult { result } => DirectoryError::from_result_code(result.rc, result.text),
        LdapError::FilterParsing => {
            DirectoryError::InvalidArgument("filter could not be parsed".to_string())
        }
        LdapError::UrlParsing { source } => DirectoryError::Config(source.to_string()),
        other => {
            warn!("Unexpected LDAP client error: {}", other);
            DirectoryError::Protocol {
                code: RC_OTHER,
                message: other.to_string(),
            }
        }
    }
}
