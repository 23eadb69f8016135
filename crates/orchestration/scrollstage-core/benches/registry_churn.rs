//! Registry churn and frame cost.
//!
//! Run with: cargo bench --bench registry_churn -p scrollstage-core

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use scrollstage_core::{
    cleanup, AnimationEngineContext, BindingKind, BindingSpec, HeadlessEngine, Page, PageConfig,
    Rect, SectionSpec, SensorReadings, StaticLayout, TimelineSpec, TimelineStep, Viewport,
};

fn bench_scope_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope_churn");
    let spec = TimelineSpec::new("bench").with_step(TimelineStep {
        target: "#a".into(),
        from: Default::default(),
        to: Default::default(),
        ease: Default::default(),
        at: 0.0,
        span: 1.0,
    });

    for handles in [8usize, 64, 512].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(handles), handles, |b, &handles| {
            let mut ctx = AnimationEngineContext::new(HeadlessEngine::new());
            ctx.begin_init();
            b.iter(|| {
                let scope = ctx.open_scope();
                for i in 0..handles {
                    if i % 2 == 0 {
                        ctx.create_timeline(scope, &spec);
                    } else {
                        ctx.register_animation(scope, cleanup(|| Ok(())));
                    }
                }
                black_box(ctx.kill_scope(scope));
            });
        });
    }
    group.finish();
}

fn bench_page_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_tick");

    for sections in [4usize, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(sections), sections, |b, &sections| {
            let mut dom = StaticLayout::new(sections as f32 * 900.0 + 900.0);
            let mut page = Page::new(
                PageConfig::default(),
                HeadlessEngine::new(),
                SensorReadings::default(),
                Viewport::new(1440.0, 900.0),
            )
            .expect("page");
            page.start();
            for i in 0..sections {
                let root = format!("#s{i}");
                dom.set_rect(&root, Rect::new(0.0, i as f32 * 900.0, 1440.0, 900.0));
                let spec = SectionSpec::new(&format!("s{i}"), &root)
                    .with_binding(BindingSpec::new("rise", BindingKind::Scrub));
                page.mount_section(spec, &dom).expect("mount");
            }
            let mut now = 0.0;
            b.iter(|| {
                now += 16.0;
                page.handle_scroll((now as f32 * 3.0) % (sections as f32 * 900.0));
                black_box(page.tick(now, &dom, None));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scope_churn, bench_page_tick);
criterion_main!(benches);
