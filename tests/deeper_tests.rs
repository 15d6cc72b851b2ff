use candle_core::{DType, Device, Tensor};
use netmorph::{
    deepen, Activation, Conv2d, Conv2dConfig, DeepenOptions, Layer, LayerHost, Linear,
    LinearConfig, Result, SequentialHost, StackEntry,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vec(n: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn quiet_opts() -> DeepenOptions {
    DeepenOptions {
        nonlinearity: None,
        batch_norm: false,
        noise: false,
        weight_norm: false,
    }
}

// The reference scenario: a 16-unit fully-connected layer deepened with no
// nonlinearity and no normalisation yields an exact 16x16 identity on top.
#[test]
fn deepened_linear_gets_exact_identity_head() -> Result<()> {
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(200);
    let layer = Layer::Linear(Linear::new(
        LinearConfig::new(6, 16),
        Tensor::from_vec(random_vec(16 * 6, &mut rng), (16, 6), &device)?,
        Tensor::from_vec(random_vec(16, &mut rng), 16, &device)?,
    )?);
    let stack = deepen(&layer, &quiet_opts(), &mut rng)?;

    let inserted = stack.inserted().expect("stack ends with the new layer");
    let weight = inserted.weight().to_vec2::<f32>()?;
    for (r, row) in weight.iter().enumerate() {
        for (c, &value) in row.iter().enumerate() {
            assert_eq!(value, if r == c { 1.0 } else { 0.0 });
        }
    }
    assert!(inserted.bias().to_vec1::<f32>()?.into_iter().all(|b| b == 0.0));
    Ok(())
}

#[test]
fn spliced_stack_leaves_host_output_unchanged() -> Result<()> {
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(201);
    let fc = Linear::new(
        LinearConfig::new(4, 4),
        Tensor::from_vec(random_vec(16, &mut rng), (4, 4), &device)?,
        Tensor::from_vec(random_vec(4, &mut rng), 4, &device)?,
    )?;
    let mut host = SequentialHost::new();
    host.push_layer("fc", Layer::Linear(fc.clone()));

    let input = Tensor::from_vec(random_vec(8, &mut rng), (2, 4), &device)?;
    let before = host.forward(&input)?;

    let stack = deepen(&Layer::Linear(fc), &quiet_opts(), &mut rng)?;
    host.splice_stack("fc", stack)?;
    assert_eq!(host.names(), vec!["fc", "fc.1"]);

    let after = host.forward(&input)?;
    let diff = after.sub(&before)?.abs()?.flatten_all()?.to_vec1::<f32>()?;
    assert!(diff.into_iter().all(|d| d == 0.0));
    Ok(())
}

#[test]
fn relu_stack_matches_activated_base_output() -> Result<()> {
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(202);
    let conv = Conv2d::new(
        Conv2dConfig::same_padded(3, 5, (3, 3)),
        Tensor::from_vec(random_vec(5 * 3 * 3 * 3, &mut rng), (5, 3, 3, 3), &device)?,
        Tensor::from_vec(random_vec(5, &mut rng), 5, &device)?,
    )?;
    let opts = DeepenOptions {
        nonlinearity: Some(Activation::Relu),
        batch_norm: true,
        noise: false,
        weight_norm: false,
    };
    let stack = deepen(&Layer::Conv2d(conv.clone()), &opts, &mut rng)?;
    assert_eq!(stack.entries().len(), 4);
    assert!(matches!(stack.entries()[1], StackEntry::BatchNorm(_)));
    assert!(matches!(stack.entries()[2], StackEntry::Activation(_)));

    let input = Tensor::from_vec(random_vec(3 * 8 * 8, &mut rng), (1, 3, 8, 8), &device)?;
    let expected = Activation::Relu.apply(&conv.forward(&input)?)?;
    let actual = stack.forward(&input)?;
    // The identity batch norm divides by sqrt(1 + eps), so equality holds to
    // its epsilon rather than exactly.
    let diff = actual.sub(&expected)?.abs()?.flatten_all()?.to_vec1::<f32>()?;
    assert!(diff.into_iter().all(|d| d < 1e-3));
    Ok(())
}

#[test]
fn splice_rejects_unknown_target() -> Result<()> {
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(203);
    let fc = Linear::new(
        LinearConfig::new(2, 2),
        Tensor::zeros((2, 2), DType::F32, &device)?,
        Tensor::zeros(2, DType::F32, &device)?,
    )?;
    let mut host = SequentialHost::new();
    host.push_layer("fc", Layer::Linear(fc.clone()));
    let stack = deepen(&Layer::Linear(fc), &quiet_opts(), &mut rng)?;
    assert!(host.splice_stack("missing", stack).is_err());
    assert_eq!(host.names(), vec!["fc"]);
    Ok(())
}
