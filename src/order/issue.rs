//! Issuance of one certificate, start to finish.
use crate::cert::{Certificate, Csr};
use crate::hook::{dns_record_name, DnsHook};
use crate::order::Challenge;
use crate::poll::{IssueConfig, PollPolicy};
use crate::req::HttpClient;
use crate::{Account, Error, Result};

/// A `TXT` record created through the hook, to be removed again.
struct Provisioned {
    identifier: String,
    value: String,
}

pub(crate) fn issue<H: HttpClient>(
    account: &Account<H>,
    csr: &Csr,
    hook: &mut dyn DnsHook,
    config: &IssueConfig,
) -> Result<Certificate> {
    let domains = csr.domains()?;
    let (primary, alt) = domains.split_first().ok_or("CSR has no domains")?;
    let alt: Vec<&str> = alt.iter().map(|d| d.as_str()).collect();
    info!("Issue certificate for {} {:?}", primary, alt);

    let ord_new = account.new_order(primary, &alt)?;

    if !ord_new.is_validated() {
        let mut challenges = vec![];
        for auth in ord_new.authorizations()? {
            let api_auth = auth.api_auth();
            if api_auth.is_status_valid() {
                debug!("Authorization for {} already valid", auth.domain_name());
                continue;
            }
            if api_auth.is_status_final() {
                return Err(Error::ValidationRejected {
                    identifier: auth.domain_name().to_string(),
                    problem: api_auth.challenge_error().cloned(),
                });
            }
            challenges.push(auth.dns_challenge()?);
        }
        authorize(&challenges, hook, &config.authorization)?;
    }

    let ord_csr = ord_new.wait_ready(&config.order)?;
    let ord_cert = ord_csr.finalize(csr, &config.order)?;
    let cert = ord_cert.download_cert()?;
    info!("Certificate issued for {}", primary);
    Ok(cert)
}

/// Provision, validate and clean up all `challenges`.
///
/// Cleanup runs for every created record no matter how validation went. The first
/// error of provisioning or validation wins over a cleanup error.
fn authorize<H: HttpClient>(
    challenges: &[Challenge<H>],
    hook: &mut dyn DnsHook,
    poll: &PollPolicy,
) -> Result<()> {
    let mut provisioned = vec![];
    let result = provision_and_validate(challenges, hook, poll, &mut provisioned);
    let cleaned = cleanup(hook, &provisioned);
    result.and(cleaned)
}

fn provision_and_validate<H: HttpClient>(
    challenges: &[Challenge<H>],
    hook: &mut dyn DnsHook,
    poll: &PollPolicy,
    provisioned: &mut Vec<Provisioned>,
) -> Result<()> {
    for chall in challenges {
        let identifier = chall.identifier();
        let value = chall.dns_proof()?;
        info!("Create TXT record {}", dns_record_name(identifier));
        hook.create(identifier, &value)
            .map_err(|e| hook_error(identifier, "create", e))?;
        provisioned.push(Provisioned {
            identifier: identifier.to_string(),
            value,
        });
    }

    // every record is in place before the API gets to look at any of them.
    for chall in challenges {
        if chall.need_validate() {
            chall.signal_ready()?;
        }
    }

    for chall in challenges {
        chall.wait_for_auth_status(poll)?;
        info!("Authorization for {} is valid", chall.identifier());
    }
    Ok(())
}

fn cleanup(hook: &mut dyn DnsHook, provisioned: &[Provisioned]) -> Result<()> {
    let mut first_err = None;
    for rec in provisioned {
        info!("Remove TXT record {}", dns_record_name(&rec.identifier));
        if let Err(e) = hook.cleanup(&rec.identifier, &rec.value) {
            warn!("Failed to remove TXT record for {}: {}", rec.identifier, e);
            if first_err.is_none() {
                first_err = Some(hook_error(&rec.identifier, "cleanup", e));
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn hook_error(identifier: &str, action: &'static str, e: Error) -> Error {
    Error::Hook {
        identifier: identifier.to_string(),
        action,
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod test {
    use crate::test::*;
    use crate::*;

    fn account(server: &FakeServer) -> Result<Account<FakeServer>> {
        let dir = Directory::from_url(server.clone(), DirectoryUrl::Other(&server.dir_url()))?;
        dir.account(account_key(), &["mailto:foo@bar.com"])
    }

    fn csr(domains: &[&str]) -> Result<Csr> {
        Csr::new(&create_p256_key()?, domains)
    }

    /// Order for example.org and www.example.org, one authorization each.
    fn two_domain_server() -> FakeServer {
        let server = with_directory_server();
        let order = |status: &str| {
            json_response(
                200,
                &serde_json::json!({
                    "status": status,
                    "identifiers": [
                        { "type": "dns", "value": "example.org" },
                        { "type": "dns", "value": "www.example.org" }
                    ],
                    "authorizations": [url("/acme/authz/1"), url("/acme/authz/2")],
                    "finalize": url(FINALIZE),
                    "certificate": url(CERT)
                })
                .to_string(),
            )
            .header("Location", &url(ORDER))
        };
        server.route("POST", "/acme/new-order", vec![order("pending")]);
        server.route("POST", ORDER, vec![order("ready"), order("valid")]);
        server.route(
            "POST",
            "/acme/authz/1",
            vec![
                authz_response("example.org", "pending"),
                authz_response("example.org", "valid"),
            ],
        );
        server.route(
            "POST",
            "/acme/authz/2",
            vec![
                authz_response("www.example.org", "pending"),
                authz_response("www.example.org", "valid"),
            ],
        );
        server
    }

    #[test]
    fn test_issue_happy_path() -> Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();
        let server = with_directory_server();
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        let cert = acc.issue(&csr(&["example.org"])?, &mut hook, &fast_config())?;

        assert_eq!(hook.created.len(), 1);
        assert_eq!(hook.created[0].0, "example.org");
        assert_eq!(hook.cleaned, hook.created);
        // one fetch, then polled through pending, processing and valid
        assert!(server.count("POST", AUTHZ) >= 3);
        assert_eq!(server.count("POST", CHALLENGE), 1);
        assert_eq!(server.count("POST", FINALIZE), 1);
        assert_eq!(server.count("POST", CERT), 1);
        assert!(!cert.certificate().is_empty());
        assert!(cert.private_key().is_some());
        Ok(())
    }

    #[test]
    fn test_record_value_is_key_authorization_digest() -> Result<()> {
        let server = with_directory_server();
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        acc.issue(&csr(&["example.org"])?, &mut hook, &fast_config())?;

        let token = "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8";
        let key_auth = format!("{}.{}", token, acc.acme_key().thumbprint()?);
        let expect = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            openssl::sha::sha256(key_auth.as_bytes()),
        );
        assert_eq!(hook.created[0].1, expect);
        Ok(())
    }

    #[test]
    fn test_challenge_signaled_after_all_records() -> Result<()> {
        let server = two_domain_server();
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        acc.issue(
            &csr(&["example.org", "www.example.org"])?,
            &mut hook,
            &fast_config(),
        )?;
        assert_eq!(hook.created.len(), 2);
        assert_eq!(hook.cleaned.len(), 2);
        assert_eq!(server.count("POST", CHALLENGE), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_authorization_cleans_up_and_stops() -> Result<()> {
        let server = with_directory_server();
        server.route(
            "POST",
            AUTHZ,
            vec![
                authz_response("example.org", "pending"),
                invalid_authz_response("example.org"),
            ],
        );
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        let res = acc.issue(&csr(&["example.org"])?, &mut hook, &fast_config());

        assert!(matches!(res, Err(Error::ValidationRejected { .. })));
        assert_eq!(hook.cleaned, hook.created);
        assert_eq!(hook.cleaned.len(), 1);
        assert_eq!(server.count("POST", FINALIZE), 0);
        assert_eq!(server.count("POST", CERT), 0);
        Ok(())
    }

    #[test]
    fn test_validation_timeout_cleans_up() -> Result<()> {
        let server = with_directory_server();
        server.route("POST", AUTHZ, vec![authz_response("example.org", "pending")]);
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        let config = fast_config();
        let res = acc.issue(&csr(&["example.org"])?, &mut hook, &config);

        assert!(matches!(res, Err(Error::Timeout { .. })));
        assert_eq!(hook.cleaned.len(), 1);
        // one fetch of the authorization, then the poll budget
        assert_eq!(
            server.count("POST", AUTHZ),
            1 + config.authorization.max_attempts
        );
        Ok(())
    }

    #[test]
    fn test_already_valid_authorization_is_skipped() -> Result<()> {
        let server = with_directory_server();
        server.route("POST", AUTHZ, vec![authz_response("example.org", "valid")]);
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        acc.issue(&csr(&["example.org"])?, &mut hook, &fast_config())?;

        assert!(hook.created.is_empty());
        assert!(hook.cleaned.is_empty());
        assert_eq!(server.count("POST", CHALLENGE), 0);
        assert_eq!(server.count("POST", FINALIZE), 1);
        Ok(())
    }

    #[test]
    fn test_ready_order_skips_authorizations() -> Result<()> {
        let server = with_directory_server();
        server.route("POST", "/acme/new-order", vec![order_response(201, "ready")]);
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        acc.issue(&csr(&["example.org"])?, &mut hook, &fast_config())?;
        assert_eq!(server.count("POST", AUTHZ), 0);
        assert!(hook.created.is_empty());
        Ok(())
    }

    #[test]
    fn test_hook_failure_cleans_up_created_records() -> Result<()> {
        let server = two_domain_server();
        let acc = account(&server)?;
        let mut hook = FakeHook {
            fail_create: Some("www.example.org".into()),
            ..Default::default()
        };
        let res = acc.issue(
            &csr(&["example.org", "www.example.org"])?,
            &mut hook,
            &fast_config(),
        );
        match res {
            Err(Error::Hook {
                identifier, action, ..
            }) => {
                assert_eq!(identifier, "www.example.org");
                assert_eq!(action, "create");
            }
            Err(e) => panic!("expected Hook error, got {}", e),
            Ok(_) => panic!("expected Hook error"),
        }
        assert_eq!(hook.created.len(), 1);
        assert_eq!(hook.cleaned, hook.created);
        // nothing was signaled
        assert_eq!(server.count("POST", CHALLENGE), 0);
        Ok(())
    }

    #[test]
    fn test_cleanup_failure_after_success_is_reported() -> Result<()> {
        let server = with_directory_server();
        let acc = account(&server)?;
        let mut hook = FakeHook {
            fail_cleanup: Some("example.org".into()),
            ..Default::default()
        };
        let res = acc.issue(&csr(&["example.org"])?, &mut hook, &fast_config());
        match res {
            Err(Error::Hook { action, .. }) => assert_eq!(action, "cleanup"),
            Err(e) => panic!("expected Hook error, got {}", e),
            Ok(_) => panic!("expected Hook error"),
        }
        assert_eq!(server.count("POST", FINALIZE), 0);
        Ok(())
    }

    #[test]
    fn test_validation_error_wins_over_cleanup_error() -> Result<()> {
        let server = with_directory_server();
        server.route(
            "POST",
            AUTHZ,
            vec![
                authz_response("example.org", "pending"),
                invalid_authz_response("example.org"),
            ],
        );
        let acc = account(&server)?;
        let mut hook = FakeHook {
            fail_cleanup: Some("example.org".into()),
            ..Default::default()
        };
        let res = acc.issue(&csr(&["example.org"])?, &mut hook, &fast_config());
        assert!(matches!(res, Err(Error::ValidationRejected { .. })));
        assert_eq!(hook.cleaned.len(), 1);
        Ok(())
    }

    #[test]
    fn test_wildcard_uses_base_domain() -> Result<()> {
        let server = with_directory_server();
        let wildcard_authz = |status: &str| {
            let body = authz_body("example.org", status)
                .replacen(r#""status""#, r#""wildcard": true, "status""#, 1);
            json_response(200, &body)
        };
        server.route(
            "POST",
            AUTHZ,
            vec![wildcard_authz("pending"), wildcard_authz("valid")],
        );
        let acc = account(&server)?;
        let mut hook = FakeHook::default();
        acc.issue(&csr(&["*.example.org"])?, &mut hook, &fast_config())?;
        assert_eq!(hook.created[0].0, "example.org");
        assert_eq!(hook.cleaned, hook.created);
        let req = &server.requests_to("POST", "/acme/new-order")[0];
        assert_eq!(req.payload()["identifiers"][0]["value"], "*.example.org");
        Ok(())
    }
}
