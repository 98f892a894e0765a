use nalgebra::Vector4;
use vfamix::{
    Axis, ClrTransform, ColumnMap, Dataset, ResponseSampler, Result, SensitivityRequest,
    SplineSurrogateModel, SurfaceRequest, Table,
};

// reconstruct a response surface over two acids and sweep a third
fn main() -> Result<()> {
    env_logger::init();

    let table = Table::new()
        .with_column("Ac", vec![14., 16., 20., 25., 30., 12., 18., 22., 28., 15., 10., 24.])?
        .with_column("Pr", vec![10., 11., 14., 15., 18., 20., 22., 12., 16., 25., 15., 20.])?
        .with_column("Val", vec![12., 13., 11., 10., 12., 18., 15., 20., 16., 20., 25., 21.])?
        .with_column("But", vec![64., 60., 55., 50., 40., 50., 45., 46., 40., 40., 50., 35.])?
        .with_column(
            "methane_yield",
            vec![25.1, 26.3, 28.4, 29.8, 27.2, 24.0, 26.9, 27.7, 28.9, 24.8, 21.5, 27.0],
        )?
        .with_column(
            "biogas_volume",
            vec![410., 425., 452., 470., 441., 398., 433., 446., 460., 404., 371., 437.],
        )?;
    let map = ColumnMap::new(["Ac", "Pr", "Val", "But"], &["methane_yield", "biogas_volume"]);
    let dataset = Dataset::<4>::from_table(&table, &map)?;

    let transform = ClrTransform::<4>::new();
    let clr = transform.clr_matrix(dataset.compositions())?;

    // one surrogate per response
    let yield_model = SplineSurrogateModel::new().fit(&clr, dataset.response("methane_yield")?)?;
    let volume_model = SplineSurrogateModel::new().fit(&clr, dataset.response("biogas_volume")?)?;

    let baseline = Vector4::new(20., 15., 15., 50.);
    let sampler = ResponseSampler::new(&transform);

    // yield over the acetic x butyric plane at 100 mass units total
    let surface = sampler.surface(
        &yield_model,
        &SurfaceRequest {
            x_component: 0,
            y_component: 3,
            x_axis: Axis::new(5., 40., 41),
            y_axis: Axis::new(20., 70., 41),
            baseline,
            total_mass: 100.,
        },
    )?;
    println!("{surface}\n");

    // both responses as propionic acid is swept +-20% around its baseline
    let curves = sampler.sensitivity(
        &[&yield_model, &volume_model],
        &SensitivityRequest {
            component: 1,
            axis: Axis::around(baseline[1], 0.2, 11),
            baseline,
            total_mass: 100.,
        },
    )?;
    println!("{:<10}{:>16}{:>16}", "Pr mass", "methane_yield", "biogas_volume");
    for (i, level) in curves.levels.iter().enumerate() {
        println!(
            "{:<10.2}{:>16.3}{:>16.3}",
            level,
            curves.values[(i, 0)],
            curves.values[(i, 1)]
        );
    }

    Ok(())
}
