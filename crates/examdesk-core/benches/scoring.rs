use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use examdesk_core::model::{AnswerPayload, Question, QuestionType};
use examdesk_core::scoring::{composite_score, objective_points, remaining_cap, ScoreSheet};

fn make_question(id: i64, question_type: QuestionType, max_points: f64) -> Question {
    Question {
        id,
        question_type,
        content: format!("question {id}"),
        max_points,
        options: vec![],
        premises: vec![],
        correct_answers: vec!["A".into(), "B".into(), "C".into()],
    }
}

fn bench_objective(c: &mut Criterion) {
    let mut group = c.benchmark_group("objective_points");
    let question = make_question(1, QuestionType::Multi, 10.0);
    let exact = AnswerPayload::Multi(["A", "B", "C"].iter().map(|s| s.to_string()).collect());
    let partial = AnswerPayload::Multi(["A", "C"].iter().map(|s| s.to_string()).collect());

    group.bench_function("multi exact", |b| {
        b.iter(|| objective_points(black_box(&question), black_box(Some(&exact))))
    });
    group.bench_function("multi partial", |b| {
        b.iter(|| objective_points(black_box(&question), black_box(Some(&partial))))
    });
    group.finish();
}

fn bench_cap(c: &mut Criterion) {
    let mut group = c.benchmark_group("remaining_cap");
    for size in [10_i64, 100] {
        let current: HashMap<i64, f64> = (0..size).map(|id| (id, 0.5)).collect();
        group.bench_function(format!("{size} questions"), |b| {
            b.iter(|| remaining_cap(black_box(&current), black_box(3), black_box(20.0)))
        });
    }
    group.finish();
}

fn bench_sheet(c: &mut Criterion) {
    let questions: Vec<Question> = (1..=50)
        .map(|id| make_question(id, QuestionType::Essay, 2.0))
        .collect();

    c.bench_function("score sheet: 50 edits", |b| {
        b.iter(|| {
            let mut sheet = ScoreSheet::new(1, &questions);
            for q in &questions {
                let _ = sheet.set_points(q.id, black_box(1.5));
            }
            sheet.snapshot()
        })
    });

    c.bench_function("composite mean", |b| {
        b.iter(|| composite_score(black_box(&[Some(80.0), None, Some(60.0)])))
    });
}

criterion_group!(benches, bench_objective, bench_cap, bench_sheet);
criterion_main!(benches);
