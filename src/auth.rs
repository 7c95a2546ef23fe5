use anyhow::{Context, Result};
use reqwest::blocking::Client;
use url::Url;

use crate::errors::PipelineError;

/// CAS login credentials, resolved by the caller. Never read from globals.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// An HTTP client carrying the CAS-issued cookies. Created once per run and
/// read-only afterwards; the cookie jar is internal to the client.
pub struct Session {
    client: Client,
}

impl Session {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[derive(Debug)]
struct LoginForm {
    lt: String,
    action: String,
}

#[derive(Debug)]
struct SamlRelay {
    relay_state: String,
    saml_response: String,
    action: String,
}

/// Authenticate against a CAS deployment and return a session usable for
/// subsequent requests to the target domain.
///
/// The dance: GET the target URL (CAS redirects to its login page), submit
/// the login form with the page's hidden `lt` token, then relay the SAML
/// assertion the response embeds as hidden fields. Any expected element
/// that is absent fails with an error naming it.
pub fn login(cas_base_url: &str, target_url: &str, credentials: &Credentials) -> Result<Session> {
    let client = Client::builder()
        .cookie_store(true)
        .build()
        .context("failed to create HTTP client")?;

    let login_page = client
        .get(target_url)
        .send()
        .with_context(|| format!("failed to reach {target_url}"))?
        .text()
        .context("failed to read the CAS login page")?;
    let form = parse_login_form(&login_page)?;

    let action = Url::parse(cas_base_url)
        .with_context(|| format!("invalid CAS base URL {cas_base_url}"))?
        .join(&form.action)
        .with_context(|| format!("failed to resolve login form action '{}'", form.action))?;

    let relay_page = client
        .post(action)
        .form(&[
            ("lt", form.lt.as_str()),
            ("execution", "e1s1"),
            ("_eventId", "submit"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ])
        .send()
        .context("failed to submit the CAS login form")?
        .text()
        .context("failed to read the SAML relay page")?;
    let relay = parse_saml_relay(&relay_page)?;

    client
        .post(&relay.action)
        .form(&[
            ("RelayState", relay.relay_state.as_str()),
            ("SAMLResponse", relay.saml_response.as_str()),
        ])
        .send()
        .context("failed to relay the SAML assertion")?;

    Ok(Session { client })
}

fn parse_login_form(html: &str) -> Result<LoginForm> {
    let dom = tl::parse(html, tl::ParserOptions::default())
        .context("CAS login page is not parseable HTML")?;
    let lt = input_value(&dom, "lt").ok_or(PipelineError::Authentication { field: "lt" })?;
    let action = form_action(&dom, Some("login"))
        .ok_or(PipelineError::Authentication { field: "login form action" })?;
    Ok(LoginForm { lt, action })
}

fn parse_saml_relay(html: &str) -> Result<SamlRelay> {
    let dom = tl::parse(html, tl::ParserOptions::default())
        .context("SAML relay page is not parseable HTML")?;
    let relay_state = input_value(&dom, "RelayState")
        .ok_or(PipelineError::Authentication { field: "RelayState" })?;
    let saml_response = input_value(&dom, "SAMLResponse")
        .ok_or(PipelineError::Authentication { field: "SAMLResponse" })?;
    let action = form_action(&dom, None)
        .ok_or(PipelineError::Authentication { field: "assertion form action" })?;
    Ok(SamlRelay {
        relay_state,
        saml_response,
        action: decode_entity_escapes(&action),
    })
}

/// Value of the first `<input name="...">` with the given name. Empty
/// values count as missing so they cannot propagate downstream.
fn input_value(dom: &tl::VDom<'_>, name: &'static str) -> Option<String> {
    let parser = dom.parser();
    dom.query_selector("input")?.find_map(|handle| {
        let tag = handle.get(parser)?.as_tag()?;
        if attribute(tag, "name")? != name {
            return None;
        }
        attribute(tag, "value").filter(|value| !value.is_empty())
    })
}

/// Action of the named `<form>`, or of the first form when no name is
/// required (the SAML relay page carries a single anonymous form).
fn form_action(dom: &tl::VDom<'_>, form_name: Option<&'static str>) -> Option<String> {
    let parser = dom.parser();
    dom.query_selector("form")?.find_map(|handle| {
        let tag = handle.get(parser)?.as_tag()?;
        if let Some(name) = form_name {
            if attribute(tag, "name").as_deref() != Some(name) {
                return None;
            }
        }
        attribute(tag, "action").filter(|action| !action.is_empty())
    })
}

fn attribute(tag: &tl::HTMLTag<'_>, key: &'static str) -> Option<String> {
    tag.attributes()
        .get(key)
        .flatten()
        .map(|bytes| bytes.as_utf8_str().into_owned())
}

/// CAS escapes `:` and `/` in the assertion form action as hex character
/// references; decode them before using the URL.
fn decode_entity_escapes(value: &str) -> String {
    value.replace("&#x3a;", ":").replace("&#x2f;", "/")
}

#[cfg(test)]
mod tests {
    use super::{decode_entity_escapes, parse_login_form, parse_saml_relay};
    use crate::errors::PipelineError;

    const LOGIN_PAGE: &str = r#"
        <html><body>
        <form id="fm1" name="login" action="login?service=https%3A%2F%2Fexample.edu" method="post">
            <input type="text" name="username" value="" />
            <input type="password" name="password" value="" />
            <input type="hidden" name="lt" value="LT-1234-abcdef" />
            <input type="hidden" name="execution" value="e1s1" />
        </form>
        </body></html>
    "#;

    const RELAY_PAGE: &str = r#"
        <html><body onload="document.forms[0].submit()">
        <form action="https&#x3a;&#x2f;&#x2f;media.example.edu&#x2f;Mediasite&#x2f;Sso" method="post">
            <input type="hidden" name="RelayState" value="https://media.example.edu/Mediasite/Play/abc123" />
            <input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNlPg==" />
            <input type="submit" value="Continue" />
        </form>
        </body></html>
    "#;

    fn authentication_field(error: &anyhow::Error) -> &'static str {
        match error.downcast_ref::<PipelineError>() {
            Some(PipelineError::Authentication { field }) => *field,
            other => panic!("expected an authentication error, got {other:?}"),
        }
    }

    #[test]
    fn login_form_fields_are_extracted() {
        let form = parse_login_form(LOGIN_PAGE).expect("login form should parse");
        assert_eq!(form.lt, "LT-1234-abcdef");
        assert_eq!(form.action, "login?service=https%3A%2F%2Fexample.edu");
    }

    #[test]
    fn missing_lt_token_is_a_named_failure() {
        let page = LOGIN_PAGE.replace("name=\"lt\"", "name=\"other\"");
        let error = parse_login_form(&page).expect_err("lt should be required");
        assert_eq!(authentication_field(&error), "lt");
    }

    #[test]
    fn empty_lt_value_counts_as_missing() {
        let page = LOGIN_PAGE.replace("LT-1234-abcdef", "");
        let error = parse_login_form(&page).expect_err("empty lt should be rejected");
        assert_eq!(authentication_field(&error), "lt");
    }

    #[test]
    fn missing_login_form_is_a_named_failure() {
        let page = LOGIN_PAGE.replace("name=\"login\"", "name=\"search\"");
        let error = parse_login_form(&page).expect_err("login form should be required");
        assert_eq!(authentication_field(&error), "login form action");
    }

    #[test]
    fn saml_relay_fields_are_extracted_and_action_decoded() {
        let relay = parse_saml_relay(RELAY_PAGE).expect("relay page should parse");
        assert_eq!(
            relay.relay_state,
            "https://media.example.edu/Mediasite/Play/abc123"
        );
        assert_eq!(relay.saml_response, "PHNhbWxwOlJlc3BvbnNlPg==");
        assert_eq!(relay.action, "https://media.example.edu/Mediasite/Sso");
    }

    #[test]
    fn missing_saml_response_is_a_named_failure() {
        let page = RELAY_PAGE.replace("SAMLResponse", "SomethingElse");
        let error = parse_saml_relay(&page).expect_err("SAMLResponse should be required");
        assert_eq!(authentication_field(&error), "SAMLResponse");
    }

    #[test]
    fn missing_relay_state_is_a_named_failure() {
        let page = RELAY_PAGE.replace("RelayState", "SomethingElse");
        let error = parse_saml_relay(&page).expect_err("RelayState should be required");
        assert_eq!(authentication_field(&error), "RelayState");
    }

    #[test]
    fn entity_escapes_decode_to_url_characters() {
        assert_eq!(
            decode_entity_escapes("https&#x3a;&#x2f;&#x2f;host&#x2f;path"),
            "https://host/path"
        );
    }
}
