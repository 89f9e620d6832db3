use axum::response::Html;

const UPLOAD_PAGE: &str = include_str!("../../../assets/index.html");

pub async fn upload_page() -> Html<&'static str> {
    Html(UPLOAD_PAGE)
}
