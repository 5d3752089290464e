//! Landing page

use axum::response::Html;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Kidney CT Classifier</title>
  <style>
    body { font-family: sans-serif; max-width: 640px; margin: 3rem auto; color: #2c3e50; }
    img { max-width: 100%; margin-top: 1rem; }
    #result { font-size: 1.5rem; margin-top: 1rem; }
    button { margin-right: 0.5rem; }
  </style>
</head>
<body>
  <h1>Kidney CT Classifier</h1>
  <p>Upload a CT slice to classify it as Cyst, Normal, Stone or Tumor.</p>
  <input type="file" id="file" accept="image/*">
  <button id="predict">Predict</button>
  <button id="train">Train</button>
  <div id="result"></div>
  <img id="preview" alt="">
  <script>
    let encoded = null;
    document.getElementById('file').addEventListener('change', (e) => {
      const reader = new FileReader();
      reader.onload = () => {
        document.getElementById('preview').src = reader.result;
        encoded = reader.result.split(',')[1];
      };
      reader.readAsDataURL(e.target.files[0]);
    });
    document.getElementById('predict').addEventListener('click', async () => {
      const out = document.getElementById('result');
      if (!encoded) { out.textContent = 'Choose an image first'; return; }
      const res = await fetch('/predict', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ image: encoded })
      });
      const body = await res.json();
      out.textContent = res.ok ? body[0].image : body.error;
    });
    document.getElementById('train').addEventListener('click', async () => {
      const out = document.getElementById('result');
      out.textContent = 'Training...';
      const res = await fetch('/train', { method: 'POST' });
      out.textContent = await res.text();
    });
  </script>
</body>
</html>
"#;

/// GET / - Static landing page
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
