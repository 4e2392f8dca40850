//! Chat-service credential handling.
//!
//! The chat API used here accepts a browser session's bearer token plus its
//! `d` cookie. `login` drives a visible browser window through the normal
//! sign-in flow, lifts both values out of the signed-in client, validates
//! them against `auth.test`, and persists them for later runs.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::browser::BrowserPool;

/// Maximum time to wait for the user to finish signing in.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// How often to poll for the signed-in client while logging in.
const LOGIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Reads the web client's API token out of its boot data.
const TOKEN_SCRIPT: &str = r#"
    (function() {
        if (window.boot_data && window.boot_data.api_token) {
            return window.boot_data.api_token;
        }
        var raw = localStorage.getItem('localConfig_v2');
        if (raw) {
            try {
                var parsed = JSON.parse(raw);
                if (parsed && parsed.teams) {
                    var teams = Object.values(parsed.teams);
                    for (var i = 0; i < teams.length; i++) {
                        if (teams[i].token) return teams[i].token;
                    }
                }
            } catch (e) {}
        }
        if (window.TS && window.TS.boot_data && window.TS.boot_data.api_token) {
            return window.TS.boot_data.api_token;
        }
        return "";
    })()
"#;

/// Stored chat credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatCredentials {
    pub token: String,
    pub cookie: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub saved_at: String,
}

/// Read credentials from `path`. A missing file is `Ok(None)`.
pub fn load_credentials(path: &Path) -> Result<Option<ChatCredentials>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("reading credentials file"),
    };

    let creds: ChatCredentials =
        serde_json::from_str(&data).context("parsing credentials JSON")?;
    Ok(Some(creds))
}

/// Write credentials to `path` with owner-only permissions.
pub fn save_credentials(path: &Path, creds: &ChatCredentials) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context("creating credentials directory")?;
    }

    let data = serde_json::to_string_pretty(creds).context("serializing credentials")?;
    std::fs::write(path, data).context("writing credentials file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("restricting credentials file permissions")?;
    }

    Ok(())
}

/// Call `auth.test` to verify the credentials; fills in the team and user
/// fields on success.
pub async fn validate_credentials(api_base: &str, creds: &mut ChatCredentials) -> Result<()> {
    if creds.token.is_empty() {
        bail!("token is empty");
    }

    #[derive(Deserialize)]
    struct AuthTest {
        ok: bool,
        #[serde(default)]
        error: String,
        #[serde(default)]
        team_id: String,
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        team: String,
        #[serde(default)]
        user: String,
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let mut req = http
        .post(format!("{}/auth.test", api_base.trim_end_matches('/')))
        .header("Authorization", format!("Bearer {}", creds.token))
        .header("Content-Type", "application/x-www-form-urlencoded");
    if !creds.cookie.is_empty() {
        req = req.header("Cookie", format!("d={}", creds.cookie));
    }

    let result: AuthTest = req
        .send()
        .await
        .context("calling auth.test")?
        .json()
        .await
        .context("parsing auth.test response")?;

    if !result.ok {
        bail!("auth.test failed: {}", result.error);
    }

    creds.team_id = result.team_id;
    creds.user_id = result.user_id;
    creds.team_name = result.team;
    creds.user_name = result.user;

    info!(user = %creds.user_name, team = %creds.team_name, "chat-login: authenticated");
    Ok(())
}

/// Interactive login: open a visible browser at the workspace, wait for the
/// user to sign in, extract the token and `d` cookie, validate, and save.
pub async fn login(workspace_url: &str, api_base: &str, creds_file: &Path) -> Result<()> {
    info!("chat-login: launching browser; sign in to {} in the window", workspace_url);

    let mut pool = BrowserPool::new(false);
    pool.set_timeout(LOGIN_TIMEOUT);
    let session = pool.session().await?;

    let result = login_inner(&session, workspace_url).await;
    session.close().await;
    let (token, cookie) = result?;

    let mut creds = ChatCredentials {
        token,
        cookie,
        saved_at: Utc::now().to_rfc3339(),
        ..ChatCredentials::default()
    };

    validate_credentials(api_base, &mut creds)
        .await
        .context("credential validation failed")?;

    save_credentials(creds_file, &creds)?;
    info!(path = %creds_file.display(), "chat-login: credentials saved");
    Ok(())
}

async fn login_inner(
    session: &crate::browser::BrowserSession,
    workspace_url: &str,
) -> Result<(String, String)> {
    let page = session.new_page().await?;
    page.goto(workspace_url)
        .await
        .context("navigating to workspace")?;

    info!("chat-login: waiting for sign-in to complete...");

    // Poll for the signed-in client; the sidebar only exists once the
    // workspace has booted with a valid session.
    let deadline = std::time::Instant::now() + session.timeout();
    let token = loop {
        if std::time::Instant::now() > deadline {
            bail!("timed out waiting for sign-in");
        }

        if page
            .find_element(r#"[data-qa="channel_sidebar"]"#)
            .await
            .is_ok()
        {
            let token: String = page
                .evaluate(TOKEN_SCRIPT)
                .await
                .context("extracting API token")?
                .into_value()
                .context("decoding API token")?;
            if !token.is_empty() {
                break token;
            }
        }

        tokio::time::sleep(LOGIN_POLL_INTERVAL).await;
    };

    if !token.starts_with("xoxc-") {
        bail!("failed to extract a session token (got {:?})", token);
    }
    info!("chat-login: extracted session token");

    let cookies = page.get_cookies().await.context("reading browser cookies")?;
    let d_cookie = cookies
        .into_iter()
        .find(|c| c.name == "d")
        .map(|c| c.value)
        .unwrap_or_default();
    if d_cookie.is_empty() {
        bail!("failed to extract the d cookie from the browser");
    }
    info!("chat-login: extracted d cookie");

    Ok((token, d_cookie))
}
