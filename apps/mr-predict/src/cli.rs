use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use mr_berry::artifact::ModelId;
use mr_berry::predict::{ClinicalRecord, Manufacturer, Sex};
use mr_berry::preprocess::Modality;

#[derive(Debug, Parser)]
#[command(name = "mr-predict", version, about = "肝脏 MRI 局灶性病灶良恶性分类")]
pub struct Cli {
    #[arg(long, help = "MRI 扫描 (.nii, .nii.gz, .nrrd, .nhdr)")]
    pub image: PathBuf,

    #[arg(long, help = "病灶分割标注, 与扫描配准一致")]
    pub mask: PathBuf,

    #[arg(long)]
    pub age: u32,

    #[arg(long, value_enum)]
    pub sex: SexArg,

    #[arg(long, value_enum)]
    pub manufacturer: ManufacturerArg,

    #[arg(long, help = "模型标识 (默认取配置文件中的模型)")]
    pub model: Option<ModelId>,

    #[arg(long, value_enum, help = "覆盖配置文件中的模态")]
    pub modality: Option<ModalityArg>,

    #[arg(long, help = "配置文件 (YAML), 也可由 $MR_BERRY_CONFIG 给出")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "制品根目录, 覆盖配置文件")]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "关闭强度归一化")]
    pub no_normalize: bool,

    #[arg(long, default_value_t = false, help = "重采样到 1 毫米各向同性")]
    pub resample: bool,

    #[arg(long, help = "把病灶切片预览保存为 JPEG")]
    pub preview: Option<PathBuf>,

    #[arg(long, default_value_t = 0, help = "Number of threads (0 = auto)")]
    pub threads: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SexArg {
    #[value(name = "M")]
    M,
    #[value(name = "F")]
    F,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ManufacturerArg {
    #[value(name = "Siemens")]
    Siemens,
    #[value(name = "Philips")]
    Philips,
    #[value(name = "GE")]
    Ge,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModalityArg {
    #[value(name = "T1")]
    T1,
    #[value(name = "T2")]
    T2,
}

impl From<SexArg> for Sex {
    fn from(s: SexArg) -> Self {
        match s {
            SexArg::M => Sex::M,
            SexArg::F => Sex::F,
        }
    }
}

impl From<ManufacturerArg> for Manufacturer {
    fn from(m: ManufacturerArg) -> Self {
        match m {
            ManufacturerArg::Siemens => Manufacturer::Siemens,
            ManufacturerArg::Philips => Manufacturer::Philips,
            ManufacturerArg::Ge => Manufacturer::Ge,
        }
    }
}

impl From<ModalityArg> for Modality {
    fn from(m: ModalityArg) -> Self {
        match m {
            ModalityArg::T1 => Modality::T1,
            ModalityArg::T2 => Modality::T2,
        }
    }
}

impl Cli {
    pub fn clinical(&self) -> ClinicalRecord {
        ClinicalRecord {
            age: self.age,
            sex: self.sex.into(),
            manufacturer: self.manufacturer.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "mr-predict",
            "--image",
            "t2.nii.gz",
            "--mask",
            "mask.nrrd",
            "--age",
            "45",
            "--sex",
            "F",
            "--manufacturer",
            "GE",
            "--model",
            "liver_t2w_xgboost",
        ])
        .unwrap();
        let record = cli.clinical();
        assert_eq!(record.sex, Sex::F);
        assert_eq!(record.manufacturer, Manufacturer::Ge);
        assert_eq!(cli.model.unwrap().as_str(), "liver_t2w_xgboost");
        assert_eq!(cli.threads, 0);
        assert!(!cli.no_normalize);

        let bad = Cli::try_parse_from([
            "mr-predict", "--image", "a", "--mask", "b", "--age", "1", "--sex", "F", "--manufacturer", "GE",
            "--model", "../x",
        ]);
        assert!(bad.is_err());
    }
}
