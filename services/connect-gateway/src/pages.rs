//! HTML pages
//!
//! Static forms for register and login, and the signed-in home page. User
//! supplied text is escaped; the embed widget is provider-generated HTML and
//! is inserted as-is.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use tracing::warn;

use crate::AppState;
use crate::gate::RequestContext;

/// Landing page after login, registration and a completed connect.
pub const HOME_PATH: &str = "/hello";

pub const CONNECT_PATH: &str = "/connect-spotify";

/// `302 Found` to `location`.
pub fn redirect_found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
</head>
<body>
{body}
</body>
</html>
"#
    )
}

fn credentials_form(title: &str, action: &str, other_label: &str, other_href: &str) -> String {
    layout(
        title,
        &format!(
            r#"    <h1>{title}</h1>
    <form action="{action}" method="post">
        <input type="text" name="username" placeholder="Username" required>
        <input type="password" name="password" placeholder="Password" required>
        <button type="submit">{title}</button>
    </form>
    <a href="{other_href}">{other_label}</a>"#
        ),
    )
}

pub fn register_page() -> String {
    credentials_form("Register", "/register", "Login", "/login")
}

pub fn login_page() -> String {
    credentials_form("Login", "/login", "Register", "/register")
}

/// Home page body. `embed` is only shown to users with a usable token.
pub fn hello_page(username: &str, connected: bool, embed: Option<&str>) -> String {
    let username = html_escape::encode_text(username);
    let widget = match (connected, embed) {
        (true, Some(html)) => format!("    <p>Lucky song:</p>\n    {html}"),
        (true, None) => "    <p>Your Spotify account is connected.</p>".to_string(),
        (false, _) => format!(
            r#"    <p>Connect your Spotify account: <a href="{CONNECT_PATH}">Connect Spotify</a></p>"#
        ),
    };
    layout(
        "Hello",
        &format!(
            r#"    <h1>Hello</h1>
    <p>Hello, {username}</p>
{widget}
    <form action="/logout" method="post"><button type="submit">Log out</button></form>"#
        ),
    )
}

/// GET /register
pub async fn register_form() -> Html<String> {
    Html(register_page())
}

/// GET /login
pub async fn login_form() -> Html<String> {
    Html(login_page())
}

/// GET /hello
pub async fn hello(State(state): State<AppState>, ctx: RequestContext) -> Html<String> {
    let embed = match &ctx.token {
        Some(token) => match state.catalog.lucky_track_embed(&token.access_token).await {
            Ok(embed) => embed,
            Err(e) => {
                warn!(user_id = ctx.user.id, error = %e, "catalog lookup failed");
                None
            }
        },
        None => None,
    };
    Html(hello_page(
        &ctx.user.username,
        ctx.token.is_some(),
        embed.as_deref(),
    ))
}
