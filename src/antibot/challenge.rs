//! Browser challenge pages for the no-token flows.
//!
//! Each page hands the visitor a one-time token and sends them back to the
//! path they asked for; the follow-up request carries the token in the
//! challenge cookie and passes validation.

/// Challenge flavors selectable via `antibot-challenge-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Plain HTML meta refresh; works without JavaScript.
    MetaRefresh,
    /// JSON token payload for script-driven clients.
    Javascript,
    /// Countdown page that sets the cookie from script before reloading.
    Preact,
}

impl ChallengeKind {
    /// Parse the configuration value, defaulting to the meta refresh flow.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "preact" => Self::Preact,
            "javascript" => Self::Javascript,
            _ => Self::MetaRefresh,
        }
    }
}

/// The meta refresh page. The token travels in the challenge cookie set by
/// the response; the page only waits and reloads.
#[must_use]
pub fn meta_refresh_page(delay_seconds: i64, redirect_path: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <meta http-equiv="refresh" content="{delay_seconds}; url={redirect_path}">
  <title>Please wait...</title>
  <style>
    body {{ font-family: Arial, sans-serif; display: flex; align-items: center; justify-content: center; height: 100vh; background: #f5f5f5; margin: 0; }}
    .container {{ text-align: center; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); }}
    .spinner {{ border: 4px solid #f3f3f3; border-top: 4px solid #3498db; border-radius: 50%; width: 40px; height: 40px; animation: spin 1s linear infinite; margin: 20px auto; }}
    @keyframes spin {{ 0% {{ transform: rotate(0deg); }} 100% {{ transform: rotate(360deg); }} }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Verifying your browser...</h1>
    <div class="spinner"></div>
    <p>This page will automatically refresh in {delay_seconds} seconds.</p>
  </div>
</body>
</html>"#
    )
}

/// The script-driven countdown page. Sets the challenge cookie from script
/// after the configured delay and replaces the location.
#[must_use]
pub fn preact_page(token: &str, delay_seconds: i64, redirect_path: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Verifying your browser...</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; background: #0f172a; color: #e2e8f0; display: flex; align-items: center; justify-content: center; height: 100vh; margin: 0; }}
    .card {{ background: #111827; padding: 32px; border-radius: 14px; width: 360px; text-align: center; border: 1px solid #1f2937; }}
    .spinner {{ width: 56px; height: 56px; border-radius: 50%; border: 6px solid rgba(148,163,184,0.35); border-top-color: #818cf8; margin: 0 auto 16px auto; animation: spin 1s linear infinite; }}
    @keyframes spin {{ 0% {{ transform: rotate(0deg); }} 100% {{ transform: rotate(360deg); }} }}
  </style>
</head>
<body>
  <div class="card">
    <h1>Verifying your browser...</h1>
    <div class="spinner"></div>
    <p>Continuing in <span id="seconds">{delay_seconds}</span>s</p>
  </div>
  <script>
    (function() {{
      var token = "{token}";
      var delay = {delay_seconds};
      var redirectPath = "{redirect_path}";
      var left = delay;
      var label = document.getElementById("seconds");
      var countdown = setInterval(function() {{
        left = Math.max(0, left - 1);
        label.textContent = left;
      }}, 1000);
      setTimeout(function() {{
        clearInterval(countdown);
        document.cookie = "X-Form-Token-Challenge=" + token + ";path=/;max-age=600;SameSite=Lax";
        window.location.replace(redirectPath);
      }}, delay * 1000);
    }})();
  </script>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing_defaults_to_metarefresh() {
        assert_eq!(ChallengeKind::parse("metarefresh"), ChallengeKind::MetaRefresh);
        assert_eq!(ChallengeKind::parse("PREACT"), ChallengeKind::Preact);
        assert_eq!(ChallengeKind::parse("javascript"), ChallengeKind::Javascript);
        assert_eq!(ChallengeKind::parse("anything-else"), ChallengeKind::MetaRefresh);
    }

    #[test]
    fn meta_refresh_page_embeds_delay_and_path() {
        let html = meta_refresh_page(3, "/shop/checkout");
        assert!(html.contains("content=\"3; url=/shop/checkout\""));
        assert!(html.contains("refresh in 3 seconds"));
    }

    #[test]
    fn preact_page_embeds_token_and_cookie_write() {
        let html = preact_page("tok-1", 2, "/home");
        assert!(html.contains("var token = \"tok-1\""));
        assert!(html.contains("X-Form-Token-Challenge"));
        assert!(html.contains("var redirectPath = \"/home\""));
    }
}
