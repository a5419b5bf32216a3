use cnn_engine::io::{
    decode_batch_norm_params, decode_bias, decode_image, decode_kernel, decode_label, load_image,
    load_label, normalize_image, ImageFormat, LabelFormat, WeightLoader,
};
use cnn_engine::EngineError;
use std::path::PathBuf;

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cnn_engine_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn kernel_file_is_transposed_from_hwcf() {
    let (size, channels, filters) = (2, 3, 2);
    let mut file = Vec::new();
    for h in 0..size {
        for w in 0..size {
            for c in 0..channels {
                for f in 0..filters {
                    file.push((f * 1000 + c * 100 + h * 10 + w) as f32);
                }
            }
        }
    }
    let kernel = decode_kernel(&f32_bytes(&file), size, channels, filters).unwrap();
    assert_eq!(kernel.shape(), [filters, channels, size, size]);
    for f in 0..filters {
        for c in 0..channels {
            for h in 0..size {
                for w in 0..size {
                    let expected = (f * 1000 + c * 100 + h * 10 + w) as f32;
                    assert_eq!(kernel.get(f, c, h, w).unwrap(), expected);
                }
            }
        }
    }
}

#[test]
fn decoders_check_byte_length_first() {
    assert!(matches!(
        decode_bias(&[0u8; 4], 2),
        Err(EngineError::LengthMismatch {
            expected: 8,
            actual: 4
        })
    ));
    assert!(decode_kernel(&[0u8; 12], 1, 1, 2).is_err());
    assert!(decode_image(&[0u8; 5], ImageFormat::Uint8, 2, 1, 3).is_err());
    assert!(decode_label(&[0u8; 8], LabelFormat::BinaryOneHot, 3).is_err());
}

#[test]
fn decoded_tensors_are_validated() {
    let nan_kernel = f32_bytes(&[0.0, f32::NAN, 0.0, 0.0]);
    assert!(matches!(
        decode_kernel(&nan_kernel, 2, 1, 1),
        Err(EngineError::NonFinite { .. })
    ));
    assert!(decode_bias(&f32_bytes(&[f32::INFINITY]), 1).is_err());
    let nan_image = f32_bytes(&[0.5, f32::NAN]);
    assert!(decode_image(&nan_image, ImageFormat::Float32, 1, 1, 2).is_err());
}

#[test]
fn uint8_image_is_scaled_and_moved_to_channel_major() {
    // 2x1 pixels, 3 channels, HWC
    let bytes = [0u8, 255, 51, 255, 0, 102];
    let fm = decode_image(&bytes, ImageFormat::Uint8, 2, 1, 3).unwrap();
    assert_eq!(fm.shape(), [2, 1, 3]);
    assert_eq!(fm.get(0, 0, 0).unwrap(), 0.0);
    assert_eq!(fm.get(0, 1, 0).unwrap(), 1.0);
    assert_eq!(fm.get(1, 0, 0).unwrap(), 1.0);
    assert!((fm.get(2, 0, 0).unwrap() - 0.2).abs() < 1e-6);
    assert!((fm.get(2, 1, 0).unwrap() - 0.4).abs() < 1e-6);
}

#[test]
fn float_image_and_normalisation() {
    let bytes = f32_bytes(&[0.5, 0.25, 1.0, 0.75]);
    let fm = decode_image(&bytes, ImageFormat::Float32, 1, 2, 2).unwrap();
    // channel 0 holds the first value of each pixel
    assert_eq!(fm.as_slice(), &[0.5, 1.0, 0.25, 0.75]);
    let normalised = normalize_image(&fm, &[0.5, 0.25], &[0.5, 0.25]).unwrap();
    assert_eq!(normalised.as_slice(), &[0.0, 1.0, 0.0, 2.0]);
    assert!(normalize_image(&fm, &[0.0], &[1.0]).is_err());
    assert!(normalize_image(&fm, &[0.0, 0.0], &[1.0, 0.0]).is_err());
}

#[test]
fn label_formats() {
    assert_eq!(
        decode_label(b"0 0 1 0 0\n", LabelFormat::OneHotText, 5).unwrap(),
        vec![0, 0, 1, 0, 0]
    );
    assert_eq!(
        decode_label(b" 3 \n", LabelFormat::ClassIndex, 5).unwrap(),
        vec![0, 0, 0, 1, 0]
    );
    let binary: Vec<u8> = [0i32, 1, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
    assert_eq!(
        decode_label(&binary, LabelFormat::BinaryOneHot, 3).unwrap(),
        vec![0, 1, 0]
    );
    let mut padded = binary.clone();
    padded.extend_from_slice(&[0xff; 6]);
    assert_eq!(
        decode_label(&padded, LabelFormat::BinaryOneHot, 3).unwrap(),
        vec![0, 1, 0]
    );

    assert!(matches!(
        decode_label(b"0 1 1", LabelFormat::OneHotText, 3),
        Err(EngineError::InvalidLabel(_))
    ));
    assert!(decode_label(b"0 1", LabelFormat::OneHotText, 3).is_err());
    assert!(matches!(
        decode_label(b"zero", LabelFormat::ClassIndex, 3),
        Err(EngineError::Parse(_))
    ));
    assert!(decode_label(b"7", LabelFormat::ClassIndex, 3).is_err());
    assert!(decode_label(b"-1", LabelFormat::ClassIndex, 3).is_err());
    assert!(decode_label(b"", LabelFormat::ClassIndex, 3).is_err());
}

#[test]
fn batch_norm_params_from_four_arrays() {
    let params = decode_batch_norm_params(
        &f32_bytes(&[0.0, 1.0]),
        &f32_bytes(&[1.0, 4.0]),
        &f32_bytes(&[1.0, 2.0]),
        &f32_bytes(&[0.0, 0.5]),
        2,
    )
    .unwrap();
    assert_eq!(params.variance, vec![1.0, 4.0]);
    assert_eq!(params.epsilon, 1e-5);
    assert!(decode_batch_norm_params(&[], &[], &[], &[], 1).is_err());
}

#[test]
fn weight_loader_reads_layer_files() {
    let dir = scratch_dir("weights");
    let kernel_values: Vec<f32> = (0..18).map(|v| v as f32 * 0.5).collect();
    std::fs::write(dir.join("conv1_weight.bin"), f32_bytes(&kernel_values)).unwrap();
    std::fs::write(dir.join("conv1_bias.bin"), f32_bytes(&[0.1, -0.1])).unwrap();
    for (suffix, values) in [
        ("moving_mean", [0.0f32, 0.0]),
        ("moving_variance", [1.0, 1.0]),
        ("gamma", [1.0, 1.0]),
        ("beta", [0.0, 0.0]),
    ] {
        std::fs::write(dir.join(format!("bn1_{}.bin", suffix)), f32_bytes(&values)).unwrap();
    }

    let loader = WeightLoader::new(&dir);
    let (kernel, bias) = loader.load_conv_layer("conv1", 3, 1, 2).unwrap();
    assert_eq!(kernel.shape(), [2, 1, 3, 3]);
    // file index (h=0, w=0, c=0, f=1) = 1
    assert_eq!(kernel.get(1, 0, 0, 0).unwrap(), 0.5);
    assert_eq!(bias, vec![0.1, -0.1]);

    let bn = loader.load_batch_norm_params("bn1", 2).unwrap();
    assert_eq!(bn.mean, vec![0.0, 0.0]);
    assert!(matches!(
        loader.load_bias("missing_bias.bin", 2),
        Err(EngineError::Io(_))
    ));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn file_wrappers_delegate_to_decoders() {
    let dir = scratch_dir("samples");
    std::fs::write(dir.join("img.bin"), [255u8, 0, 0, 255]).unwrap();
    std::fs::write(dir.join("label.txt"), "1\n").unwrap();
    let img = load_image(dir.join("img.bin"), ImageFormat::Uint8, 2, 2, 1).unwrap();
    assert_eq!(img.as_slice(), &[1.0, 0.0, 0.0, 1.0]);
    let label = load_label(dir.join("label.txt"), LabelFormat::ClassIndex, 2).unwrap();
    assert_eq!(label, vec![0, 1]);
    assert!(load_image(dir.join("absent.bin"), ImageFormat::Uint8, 2, 2, 1).is_err());
    std::fs::remove_dir_all(&dir).ok();
}
