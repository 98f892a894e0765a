use std::sync::Arc;
use vfamix::{
    ClrTransform, ColumnMap, CompositionOptimizer, ConstrainedLinearModel, Dataset, Result,
    SplineSurrogateModel, Table,
};

// find the VFA mixture with the highest predicted methane yield
fn main() -> Result<()> {
    env_logger::init();

    // load the measured feed compositions and yields
    let table = Table::new()
        .with_column("Ac", vec![14., 16., 20., 25., 30., 12., 18., 22., 28., 15., 10., 24.])?
        .with_column("Pr", vec![10., 11., 14., 15., 18., 20., 22., 12., 16., 25., 15., 20.])?
        .with_column("Val", vec![12., 13., 11., 10., 12., 18., 15., 20., 16., 20., 25., 21.])?
        .with_column("But", vec![64., 60., 55., 50., 40., 50., 45., 46., 40., 40., 50., 35.])?
        .with_column(
            "methane_yield",
            vec![25.1, 26.3, 28.4, 29.8, 27.2, 24.0, 26.9, 27.7, 28.9, 24.8, 21.5, 27.0],
        )?;
    let map = ColumnMap::new(["Ac", "Pr", "Val", "But"], &["methane_yield"]);
    let dataset = Dataset::<4>::from_table(&table, &map)?;

    // how do the acids co-vary in the raw data?
    println!("{}\n", dataset.correlation_report());

    // map compositions to CLR coordinates
    let transform = ClrTransform::<4>::new();
    let clr = transform.clr_matrix(dataset.compositions())?;
    let y = dataset.response("methane_yield")?;

    // zero-sum constrained linear screening: which acids matter?
    let linear = ConstrainedLinearModel::new().fit(&clr, y)?;
    println!("{linear}\n");

    // additive spline surrogate with GCV-selected smoothing
    let surrogate = Arc::new(SplineSurrogateModel::new().fit(&clr, y)?);
    println!("{surrogate}\n");

    // maximize the surrogate over the zero-sum box
    let optimum = CompositionOptimizer::new().maximize(surrogate, &transform)?;
    println!("{optimum}");

    Ok(())
}
