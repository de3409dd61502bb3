use axum::response::Html;

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Landing page HTML", content_type = "text/html")
    ),
    tag = "General"
)]
pub async fn root() -> Html<&'static str> {
    Html(r#"
        <!DOCTYPE html>
        <html lang="en">
        <head>
            <meta charset="UTF-8">
            <meta name="viewport" content="width=device-width, initial-scale=1.0">
            <title>MediaTranscodeKit</title>
            <style>
                body { max-width: 720px; margin: 48px auto; font-family: Arial, sans-serif; color: #333; }
                code { background: #f0f0f0; padding: 2px 4px; border-radius: 3px; }
                li { margin: 6px 0; }
                a.docs { display: inline-block; margin-top: 20px; padding: 10px 20px; background: #007bff;
                         color: white; text-decoration: none; border-radius: 5px; font-weight: bold; }
            </style>
        </head>
        <body>
            <h1>MediaTranscodeKit</h1>
            <p>Resumable chunked video uploads and multi-quality transcoding.</p>
            <ol>
                <li><code>POST /upload/init</code> then <code>POST /upload/chunk</code> per chunk, in any order</li>
                <li><code>POST /upload/complete</code> returns the content hash</li>
                <li><code>POST /transcode/{hash}</code> with the qualities to render</li>
                <li>Poll <code>GET /transcode/{hash}/status</code> or stream <code>GET /transcode/{hash}/events</code></li>
                <li><code>PUT /videos/{hash}/stop</code> and <code>PUT /videos/{hash}/resume</code> pause and continue a job</li>
            </ol>
            <a class="docs" href="/swagger-ui/">Explore API Docs</a>
        </body>
        </html>
    "#)
}
