use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use storytime_rs::{Fragment, sanitize_html};

const CLEAN_STORY: &str = r#"<div class="story-section">
<h3>The Story</h3>
<p>I was halfway through my opening slide when the projector started playing a cooking video.</p>
<p>I asked the room what they would do, and a quiet analyst suggested we treat it as a case study.</p>
<p>By the end we had a checklist for handling surprises, and I had a recipe for lasagna.</p>
</div>
<div class="training-section">
<h3>Training Application</h3>
<div class="facilitation-guide">
<h4>How to Use This Story</h4>
<ul>
<li><strong>Opening Activity:</strong> Read the first paragraph aloud and pause.</li>
<li><strong>Discussion Questions:</strong> What would you have done first? Why?</li>
<li><strong>Learning Connection:</strong> Map each reaction to the escalation model.</li>
<li><strong>Action Planning:</strong> Pick one surprise you expect this month.</li>
</ul>
</div>
</div>"#;

const HOSTILE_STORY: &str = r#"<div onclick="steal()"><object data="x"><iframe onload="boom()"><p>inside</p></iframe></object>
<script>document.cookie</script><a href=" java&#x73;cript:alert(1)">link</a><img src=x onerror=alert(1)>
<style>p { color: red }</style><!-- hidden --><p style="x" title='t'>tail &amp; more</p></div>"#;

fn bench_sanitize(c: &mut Criterion) {
    let cases = [("clean", CLEAN_STORY), ("hostile", HOSTILE_STORY)];
    for (label, html) in cases {
        c.bench_with_input(BenchmarkId::new("sanitize_html", label), &html, |b, html| {
            b.iter(|| black_box(sanitize_html(black_box(html))));
        });
    }
}

fn bench_parse_only(c: &mut Criterion) {
    let large = CLEAN_STORY.repeat(32);
    c.bench_function("fragment_parse::large", |b| {
        b.iter(|| black_box(Fragment::parse(black_box(&large))));
    });
}

fn bench_text_content(c: &mut Criterion) {
    let fragment = Fragment::parse(CLEAN_STORY).sanitized();
    c.bench_function("fragment_text_content", |b| {
        b.iter(|| black_box(fragment.text_content()));
    });
}

criterion_group!(
    benches,
    bench_sanitize,
    bench_parse_only,
    bench_text_content
);
criterion_main!(benches);
