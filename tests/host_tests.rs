use candle_core::{DType, Device, Tensor};
use netmorph::{
    BatchNorm, Layer, LayerHost, Linear, LinearConfig, MorphError, Result, SequentialHost,
};

fn linear_layer(n: usize, fill: f32, device: &Device) -> Result<Layer> {
    let weight = Tensor::full(fill, (n, n), device)?.contiguous()?;
    let bias = Tensor::zeros(n, DType::F32, device)?;
    Ok(Layer::Linear(Linear::new(
        LinearConfig::new(n, n),
        weight,
        bias,
    )?))
}

#[test]
fn reads_and_replacements_round_trip() -> Result<()> {
    let device = Device::Cpu;
    let mut host = SequentialHost::new();
    host.push_layer("fc1", linear_layer(3, 1.0, &device)?);
    host.push_batch_norm("bn1", BatchNorm::identity(3, &device)?);
    host.push_layer("fc2", linear_layer(3, 2.0, &device)?);
    assert_eq!(host.len(), 3);
    assert_eq!(host.names(), vec!["fc1", "bn1", "fc2"]);

    host.replace_layer("fc2", linear_layer(3, -1.0, &device)?)?;
    let replaced = host.layer("fc2").expect("fc2 present");
    let values = replaced.weight().flatten_all()?.to_vec1::<f32>()?;
    assert!(values.into_iter().all(|v| v == -1.0));

    host.replace_batch_norm("bn1", BatchNorm::identity(3, &device)?)?;
    assert_eq!(host.batch_norm("bn1").expect("bn1").num_features(), 3);
    Ok(())
}

#[test]
fn layer_and_norm_namespaces_do_not_alias() -> Result<()> {
    let device = Device::Cpu;
    let mut host = SequentialHost::new();
    host.push_layer("fc1", linear_layer(2, 1.0, &device)?);
    host.push_batch_norm("bn1", BatchNorm::identity(2, &device)?);

    // A layer replacement aimed at a norm slot must not silently succeed.
    let err = host
        .replace_layer("bn1", linear_layer(2, 0.0, &device)?)
        .unwrap_err();
    assert!(matches!(err, MorphError::UnknownLayer(_)));
    assert!(host.layer("bn1").is_none());
    assert!(host.batch_norm("bn1").is_some());
    Ok(())
}
