use anyhow::{anyhow, bail, Context, Result};
use common::RenderPayload;
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::debug;

/// Expande la plantilla del comando de render. Se separa por espacios y en
/// cada argumento se reemplazan `{frame}`, `{width}`, `{height}` y `{output}`.
pub fn expand_template(template: &str, payload: &RenderPayload, output: &Path) -> Result<Vec<String>> {
    let frame = payload.frame.to_string();
    let width = payload.resolution.width().to_string();
    let height = payload.resolution.height().to_string();
    let output = output.to_string_lossy();

    let args: Vec<String> = template
        .split_whitespace()
        .map(|arg| {
            arg.replace("{frame}", &frame)
                .replace("{width}", &width)
                .replace("{height}", &height)
                .replace("{output}", &output)
        })
        .collect();

    if args.is_empty() {
        bail!("RENDER_COMMAND vacío");
    }
    Ok(args)
}

/// Archivo local donde el comando deja el frame de una tarea.
pub fn output_path(work_dir: &Path, task_id: &str) -> PathBuf {
    work_dir.join(format!("{task_id}.png"))
}

/// Ejecuta el render de un frame y devuelve los bytes producidos.
/// Bloqueante: llamar desde `spawn_blocking`.
pub fn render_frame(template: &str, payload: &RenderPayload, output: &Path) -> Result<Vec<u8>> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creando directorio de trabajo {}", parent.display()))?;
    }

    let args = expand_template(template, payload, output)?;
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("RENDER_COMMAND vacío"))?;

    debug!("ejecutando render: {}", args.join(" "));
    let result = Command::new(program)
        .args(rest)
        .output()
        .with_context(|| format!("no se pudo ejecutar {program}"))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        bail!(
            "render del frame {} falló ({}): {}",
            payload.frame,
            result.status,
            stderr.trim()
        );
    }

    let bytes = fs::read(output)
        .with_context(|| format!("el render no produjo {}", output.display()))?;
    // el archivo local ya no hace falta, el master guarda la copia final
    let _ = fs::remove_file(output);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Resolution;
    use std::env;

    fn temp_dir(sub: &str) -> PathBuf {
        let dir = env::temp_dir()
            .join("render_tests")
            .join(format!("{}-{}", sub, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn expande_todos_los_placeholders() {
        let payload = RenderPayload::new(42).with_resolution(Resolution(1280, 720));
        let args = expand_template(
            "render --frame={frame} -s {width}x{height}  -o {output}",
            &payload,
            Path::new("/tmp/out/t1.png"),
        )
        .unwrap();

        assert_eq!(
            args,
            vec!["render", "--frame=42", "-s", "1280x720", "-o", "/tmp/out/t1.png"]
        );
    }

    #[test]
    fn plantilla_vacia_es_error() {
        let payload = RenderPayload::new(1);
        assert!(expand_template("   ", &payload, Path::new("x.png")).is_err());
    }

    #[test]
    fn render_devuelve_los_bytes_del_output() {
        let dir = temp_dir("ok");
        let source = dir.join("frame.png");
        fs::write(&source, b"PNGDATA").unwrap();

        let output = output_path(&dir.join("work"), "t1");
        let template = format!("cp {} {{output}}", source.display());
        let bytes = render_frame(&template, &RenderPayload::new(1), &output).unwrap();

        assert_eq!(bytes, b"PNGDATA");
        assert!(!output.exists());
    }

    #[test]
    fn render_que_falla_es_error() {
        let dir = temp_dir("fail");
        let output = output_path(&dir, "t2");
        assert!(render_frame("false", &RenderPayload::new(1), &output).is_err());
        assert!(render_frame("true", &RenderPayload::new(1), &output).is_err());
        assert!(render_frame("no-existe-este-binario", &RenderPayload::new(1), &output).is_err());
    }
}
