use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nalgebra::{DVector, Vector4};
use std::time::Duration;
use vfamix::{
    Axis, ClrTransform, MatrixDRows, ResponseSampler, Result, SplineSurrogateModel,
    SurfaceRequest,
};

fn sample_surface(points: usize) -> Result<()> {
    let raw = [
        [14., 10., 12., 64.],
        [16., 11., 13., 60.],
        [20., 14., 11., 55.],
        [25., 15., 10., 50.],
        [30., 18., 12., 40.],
        [12., 20., 18., 50.],
        [18., 22., 15., 45.],
        [22., 12., 20., 46.],
        [28., 16., 16., 40.],
        [15., 25., 20., 40.],
        [10., 15., 25., 50.],
        [24., 20., 21., 35.],
    ];
    let transform = ClrTransform::<4>::new();
    let mut compositions = MatrixDRows::<4>::zeros(raw.len());
    for (i, row) in raw.iter().enumerate() {
        compositions.set_column(i, &Vector4::from_row_slice(row));
    }
    let clr = transform.clr_matrix(&compositions)?;
    let y = DVector::from_iterator(
        raw.len(),
        clr.column_iter()
            .map(|z| 25. + 4. * z[0] - 2. * z[0] * z[0] - 1.2 * z[1] + 0.8 * z[2] - z[3]),
    );
    let model = SplineSurrogateModel::<4>::new().fit(&clr, &y)?;

    let sampler = ResponseSampler::new(&transform);
    sampler.surface(
        &model,
        &SurfaceRequest {
            x_component: 0,
            y_component: 3,
            x_axis: Axis::new(5., 40., points),
            y_axis: Axis::new(20., 70., points),
            baseline: Vector4::new(20., 15., 15., 50.),
            total_mass: 100.,
        },
    )?;
    Ok(())
}

fn benchmark_surface_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("Response Surface Grid");
    group.sample_size(10).warm_up_time(Duration::from_secs(1));
    for points in [21, 41, 81] {
        group.bench_with_input(BenchmarkId::new("Grid size", points), &points, |b, &p| {
            b.iter(|| sample_surface(p));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_surface_grid);
criterion_main!(benches);
