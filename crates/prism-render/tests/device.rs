// SPDX-License-Identifier: CEPL-1.0
use std::borrow::Cow;

use prism_render::{
    Access, BufferDesc, BufferKind, ClearDesc, CommandKind, Device, DrawDesc, ElementType,
    Filter, HandleKind, Pass, PassOffscreenDesc, PipelineDesc, PixelFormat, ProgramDesc,
    RenderError, SamplerDesc, Settings, ShaderStage, TexMode, TextureDesc, TextureEditDesc,
    TextureRegion, TextureSize, TraceBackend, Usage, VertexInput,
};

fn device(settings: Settings) -> Device<TraceBackend> {
    Device::new(TraceBackend::new(), settings)
}

fn sampler(i: usize) -> SamplerDesc {
    SamplerDesc {
        filter: Filter::Linear,
        u: TexMode::Clamp,
        border: [i as f32, 0.0, 0.0, 1.0],
        ..SamplerDesc::default()
    }
}

fn render_target(device: &Device<TraceBackend>) -> prism_render::Texture {
    device
        .texture_new(TextureDesc {
            size: TextureSize::d2(8, 8),
            format: PixelFormat::Rgba8,
            render_target: true,
            ..TextureDesc::default()
        })
        .expect("render target")
}

fn swapchain_pass(device: &Device<TraceBackend>) -> Pass {
    let swapchain = device.swapchain_new(640, 480);
    device.pass_swapchain_new(swapchain).expect("swapchain pass")
}

#[test]
fn deferred_triangle_runs_in_order_on_flush() {
    let device = device(Settings::deferred());
    let vertex: [[f32; 3]; 1] = [[0.0, 0.5, 0.0]];
    let bytes: &[u8] = bytemuck::cast_slice(&vertex);
    assert_eq!(bytes.len(), 12);

    let pass = swapchain_pass(&device);
    let buffer = device.buffer_new(BufferDesc::vertex(bytes)).expect("buffer");
    device.pass_begin(pass).expect("begin");
    let mut draw = DrawDesc {
        elements_count: 1,
        ..DrawDesc::default()
    };
    draw.vertex_buffers[0] = Some(VertexInput {
        buffer,
        element: ElementType::Float3,
        offset: 0,
        stride: 12,
    });
    device.draw(pass, draw).expect("draw");
    device.pass_end(pass).expect("end");

    assert!(device.with_backend(|b| b.entries().is_empty()));
    device.flush();

    let kinds = device.with_backend(|b| b.kinds());
    assert_eq!(
        kinds,
        vec![
            CommandKind::SwapchainNew,
            CommandKind::PassSwapchainNew,
            CommandKind::BufferNew,
            CommandKind::PassBegin,
            CommandKind::Draw,
            CommandKind::PassEnd,
        ]
    );
    assert_eq!(device.ref_count(buffer), Some(1));
    let mut out = [0u8; 12];
    device.buffer_read(buffer, 0, &mut out).expect("read");
    assert_eq!(&out[..], bytes);
}

#[test]
fn device_queue_is_fifo() {
    let device = device(Settings::deferred());
    for value in 1..=3 {
        device.marker(value);
    }
    assert_eq!(device.queued_commands(), 3);
    device.flush();
    assert_eq!(device.queued_commands(), 0);
    assert_eq!(device.with_backend(|b| b.markers()), vec![1, 2, 3]);
}

#[test]
fn passes_are_queued_whole_in_end_order() {
    let device = device(Settings::deferred());
    let first = swapchain_pass(&device);
    let second = swapchain_pass(&device);
    device.flush();
    device.with_backend(TraceBackend::clear_entries);

    device.pass_begin(first).expect("begin first");
    device.pass_begin(second).expect("begin second");
    device.pass_marker(first, 10).expect("marker");
    device.pass_marker(second, 20).expect("marker");
    device.pass_marker(first, 11).expect("marker");
    device.pass_end(second).expect("end second");
    device.pass_end(first).expect("end first");
    device.flush();

    let entries = device.with_backend(|b| b.entries().to_vec());
    let handles: Vec<_> = entries.iter().map(|e| (e.kind, e.marker)).collect();
    assert_eq!(
        handles,
        vec![
            (CommandKind::PassBegin, None),
            (CommandKind::Marker, Some(20)),
            (CommandKind::PassEnd, None),
            (CommandKind::PassBegin, None),
            (CommandKind::Marker, Some(10)),
            (CommandKind::Marker, Some(11)),
            (CommandKind::PassEnd, None),
        ]
    );
    assert_eq!(entries[0].handle, Some(second.id()));
    assert_eq!(entries[3].handle, Some(first.id()));
}

#[test]
fn queued_payloads_do_not_alias_caller_memory() {
    let device = device(Settings::deferred());
    let pass = swapchain_pass(&device);

    let mut initial = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
    let buffer = device
        .buffer_new(BufferDesc {
            kind: BufferKind::Vertex,
            usage: Usage::Dynamic,
            access: Access::ReadWrite,
            size: 8,
            data: Some(Cow::Borrowed(&initial[..])),
        })
        .expect("buffer");
    initial.fill(0);

    let mut update = vec![9u8, 9];
    device.pass_begin(pass).expect("begin");
    device.buffer_write(pass, buffer, 2, &update).expect("write");
    update.fill(0);
    device.pass_end(pass).expect("end");
    device.flush();

    let mut out = [0u8; 8];
    device.buffer_read(buffer, 0, &mut out).expect("read");
    assert_eq!(out, [1, 2, 9, 9, 5, 6, 7, 8]);
}

#[test]
fn reads_do_not_wait_for_queued_writes() {
    let device = device(Settings::deferred());
    let pass = swapchain_pass(&device);
    let buffer = device
        .buffer_new(BufferDesc {
            kind: BufferKind::Vertex,
            usage: Usage::Dynamic,
            access: Access::ReadWrite,
            size: 4,
            data: None,
        })
        .expect("buffer");
    device.flush();

    device.pass_begin(pass).expect("begin");
    device.buffer_write(pass, buffer, 0, &[7, 7, 7, 7]).expect("write");
    device.pass_end(pass).expect("end");

    let mut out = [1u8; 4];
    device.buffer_read(buffer, 0, &mut out).expect("read");
    assert_eq!(out, [0; 4]);

    device.flush();
    device.buffer_read(buffer, 0, &mut out).expect("read");
    assert_eq!(out, [7; 4]);
}

#[test]
fn immediate_and_deferred_issue_the_same_commands() {
    fn script(device: &Device<TraceBackend>) -> Vec<CommandKind> {
        let pass = swapchain_pass(device);
        let buffer = device
            .buffer_new(BufferDesc::vertex(&[0; 24]))
            .expect("buffer");
        let pipeline = device.pipeline_new(PipelineDesc::default());
        device.pass_begin(pass).expect("begin");
        device.clear(pass, ClearDesc::default()).expect("clear");
        device.use_pipeline(pass, pipeline).expect("pipeline");
        let mut draw = DrawDesc {
            elements_count: 2,
            ..DrawDesc::default()
        };
        draw.vertex_buffers[0] = Some(VertexInput {
            buffer,
            element: ElementType::Float3,
            offset: 0,
            stride: 12,
        });
        device.draw(pass, draw).expect("draw");
        device.pass_end(pass).expect("end");
        device.marker(1);
        device.flush();
        device.with_backend(|b| b.kinds())
    }

    let immediate = script(&device(Settings::default()));
    let deferred = script(&device(Settings::deferred()));
    assert_eq!(immediate, deferred);
    assert_eq!(immediate.last(), Some(&CommandKind::Marker));
}

#[test]
fn extra_references_delay_teardown() {
    let device = device(Settings::default());
    let buffer = device.buffer_new(BufferDesc::vertex(&[1; 4])).expect("buffer");
    device.handle_ref(buffer).expect("ref");
    assert_eq!(device.ref_count(buffer), Some(2));

    device.buffer_free(buffer).expect("first free");
    assert_eq!(device.ref_count(buffer), Some(1));
    assert!(device.with_backend(|b| b.is_live(buffer.id())));

    device.buffer_free(buffer).expect("second free");
    assert_eq!(device.ref_count(buffer), None);
    assert_eq!(device.with_backend(|b| b.count(CommandKind::BufferFree)), 1);
    assert!(!device.with_backend(|b| b.is_live(buffer.id())));

    assert!(matches!(
        device.buffer_free(buffer),
        Err(RenderError::StaleHandle {
            kind: HandleKind::Buffer
        })
    ));
}

#[test]
fn offscreen_pass_keeps_attachments_alive() {
    let device = device(Settings::default());
    let color = render_target(&device);
    let mut desc = PassOffscreenDesc::default();
    desc.color[0] = Some(color);
    let pass = device.pass_offscreen_new(desc).expect("pass");
    assert_eq!(device.ref_count(color), Some(2));
    assert_eq!(device.pass_size(pass).map(|s| (s.width, s.height)).ok(), Some((8, 8)));

    device.texture_free(color).expect("texture free");
    assert!(device.with_backend(|b| b.is_live(color.id())));

    device.pass_free(pass).expect("pass free");
    assert_eq!(device.ref_count(color), None);
    assert_eq!(device.with_backend(|b| b.live(HandleKind::Texture)), 0);
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn offscreen_attachments_must_match() {
    let device = device(Settings::default());
    let small = render_target(&device);
    let large = device
        .texture_new(TextureDesc {
            size: TextureSize::d2(16, 16),
            format: PixelFormat::D24S8,
            render_target: true,
            ..TextureDesc::default()
        })
        .expect("depth target");
    let desc = PassOffscreenDesc {
        color: [Some(small), None, None, None],
        depth_stencil: Some(large),
    };
    assert!(matches!(
        device.pass_offscreen_new(desc),
        Err(RenderError::InvalidDesc(_))
    ));
    assert!(matches!(
        device.pass_offscreen_new(PassOffscreenDesc::default()),
        Err(RenderError::InvalidDesc(_))
    ));
}

#[test]
fn repeated_sampler_descs_share_one_sampler() {
    let device = device(Settings::default());
    let texture = render_target(&device);
    let pass = swapchain_pass(&device);
    device.pass_begin(pass).expect("begin");
    for slot in 0..4 {
        device
            .texture_sampler_bind(pass, texture, ShaderStage::Pixel, slot, sampler(1))
            .expect("bind");
    }
    device.texture_bind(pass, texture, ShaderStage::Pixel, 4).expect("bind");
    device.pass_end(pass).expect("end");

    assert_eq!(device.with_backend(|b| b.count(CommandKind::SamplerNew)), 2);
    assert_eq!(device.with_backend(|b| b.count(CommandKind::TextureBind)), 5);
    assert_eq!(device.cached_samplers(), vec![SamplerDesc::default(), sampler(1)]);
    assert_eq!(device.with_backend(|b| b.live(HandleKind::Sampler)), 2);
}

#[test]
fn later_passes_reuse_cached_samplers() {
    let device = device(Settings::deferred());
    let texture = render_target(&device);
    let pass = swapchain_pass(&device);
    for _ in 0..3 {
        device.pass_begin(pass).expect("begin");
        device.texture_bind(pass, texture, ShaderStage::Pixel, 0).expect("bind");
        device.pass_end(pass).expect("end");
        device.flush();
    }

    assert_eq!(device.with_backend(|b| b.count(CommandKind::TextureBind)), 3);
    assert_eq!(device.with_backend(|b| b.count(CommandKind::SamplerNew)), 1);
    assert_eq!(device.cached_samplers(), vec![SamplerDesc::default()]);
}

#[test]
fn full_cache_evicts_least_recently_used() {
    let device = device(Settings::default());
    let texture = render_target(&device);
    let pass = swapchain_pass(&device);
    device.pass_begin(pass).expect("begin");
    for i in 0..16 {
        device
            .texture_sampler_bind(pass, texture, ShaderStage::Pixel, 0, sampler(i))
            .expect("bind");
    }
    device
        .texture_sampler_bind(pass, texture, ShaderStage::Pixel, 0, sampler(0))
        .expect("rebind");
    device
        .texture_sampler_bind(pass, texture, ShaderStage::Pixel, 0, sampler(16))
        .expect("bind");
    device.pass_end(pass).expect("end");

    let cached = device.cached_samplers();
    assert_eq!(cached.len(), 16);
    assert_eq!(cached[0], sampler(16));
    assert_eq!(cached[1], sampler(0));
    assert!(!cached.contains(&sampler(1)));
    assert_eq!(device.with_backend(|b| b.live(HandleKind::Sampler)), 16);
}

#[test]
fn live_samplers_stay_bounded_across_frames() {
    let device = device(Settings::deferred());
    let texture = render_target(&device);
    let pass = swapchain_pass(&device);
    for i in 0..40 {
        device.pass_begin(pass).expect("begin");
        device
            .texture_sampler_bind(pass, texture, ShaderStage::Pixel, 0, sampler(i))
            .expect("bind");
        device.pass_end(pass).expect("end");
        device.flush();
    }
    assert_eq!(device.with_backend(|b| b.count(CommandKind::SamplerNew)), 40);
    assert!(device.with_backend(|b| b.peak_samplers()) <= 16);
}

#[test]
fn many_samplers_in_one_pass_stay_bounded() {
    let device = device(Settings::deferred());
    let texture = render_target(&device);
    let pass = swapchain_pass(&device);
    device.pass_begin(pass).expect("begin");
    for i in 0..20 {
        device
            .texture_sampler_bind(pass, texture, ShaderStage::Pixel, 0, sampler(i))
            .expect("bind");
    }
    device.pass_end(pass).expect("end");
    device.flush();

    assert_eq!(device.with_backend(|b| b.count(CommandKind::TextureBind)), 20);
    assert_eq!(device.with_backend(|b| b.count(CommandKind::SamplerNew)), 20);
    assert!(device.with_backend(|b| b.peak_samplers()) <= 16);
    assert_eq!(device.cached_samplers().len(), 16);
}

#[test]
fn freeing_a_recording_pass_drops_its_binds() {
    let device = device(Settings::default());
    let texture = render_target(&device);
    let pass = swapchain_pass(&device);
    device.pass_begin(pass).expect("begin");
    device
        .texture_sampler_bind(pass, texture, ShaderStage::Pixel, 0, sampler(3))
        .expect("bind");

    device.pass_free(pass).expect("free");
    assert!(device.cached_samplers().is_empty());
    assert_eq!(device.with_backend(|b| b.count(CommandKind::SamplerNew)), 0);
    assert_eq!(device.with_backend(|b| b.count(CommandKind::TextureBind)), 0);
}

#[test]
fn dispose_releases_cached_samplers() {
    let device = device(Settings::deferred());
    let texture = render_target(&device);
    let pass = swapchain_pass(&device);
    device.pass_begin(pass).expect("begin");
    device.texture_bind(pass, texture, ShaderStage::Pixel, 0).expect("bind");
    device.pass_end(pass).expect("end");
    device.pass_free(pass).expect("pass free");
    device.texture_free(texture).expect("texture free");

    let backend = device.dispose();
    assert_eq!(backend.live(HandleKind::Sampler), 0);
    assert_eq!(backend.live(HandleKind::Texture), 0);
    assert_eq!(backend.live(HandleKind::Pass), 0);
}

#[test]
fn recording_state_is_enforced() {
    let device = device(Settings::default());
    let pass = swapchain_pass(&device);
    assert!(matches!(
        device.clear(pass, ClearDesc::default()),
        Err(RenderError::PassNotRecording)
    ));
    assert!(matches!(device.pass_end(pass), Err(RenderError::PassNotRecording)));

    device.pass_begin(pass).expect("begin");
    assert!(matches!(
        device.pass_begin(pass),
        Err(RenderError::PassAlreadyRecording)
    ));
    device.pass_end(pass).expect("end");
}

#[test]
fn invalid_buffer_descriptors_are_rejected() {
    let device = device(Settings::default());
    let cases = [
        BufferDesc::default(),
        BufferDesc {
            usage: Usage::Dynamic,
            access: Access::None,
            size: 16,
            ..BufferDesc::default()
        },
        BufferDesc {
            size: 16,
            ..BufferDesc::default()
        },
        BufferDesc {
            kind: BufferKind::Uniform,
            usage: Usage::Dynamic,
            access: Access::Write,
            size: 20,
            data: None,
        },
    ];
    for desc in cases {
        assert!(matches!(
            device.buffer_new(desc),
            Err(RenderError::InvalidDesc(_))
        ));
    }
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn writes_past_the_end_are_rejected() {
    let device = device(Settings::default());
    let pass = swapchain_pass(&device);
    let buffer = device.buffer_new(BufferDesc::vertex(&[0; 8])).expect("buffer");
    device.pass_begin(pass).expect("begin");
    assert!(matches!(
        device.buffer_write(pass, buffer, 6, &[1, 2, 3]),
        Err(RenderError::InvalidDesc(_))
    ));
    device.buffer_write(pass, buffer, 0, &[]).expect("empty write is a no-op");
    device.pass_end(pass).expect("end");
    assert_eq!(device.with_backend(|b| b.count(CommandKind::BufferWrite)), 0);
}

#[test]
fn texture_regions_round_trip_through_a_pass() {
    let device = device(Settings::default());
    let texture = device
        .texture_new(TextureDesc {
            size: TextureSize::d2(4, 4),
            format: PixelFormat::R8,
            usage: Usage::Dynamic,
            access: Access::ReadWrite,
            ..TextureDesc::default()
        })
        .expect("texture");
    let pass = swapchain_pass(&device);
    device.pass_begin(pass).expect("begin");
    device
        .texture_write(
            pass,
            texture,
            TextureEditDesc {
                x: 1,
                y: 1,
                width: 2,
                height: 2,
                bytes: Cow::Borrowed(&[1u8, 2, 3, 4][..]),
                ..TextureEditDesc::default()
            },
        )
        .expect("write");
    device.pass_end(pass).expect("end");

    let mut texels = [0u8; 16];
    let region = TextureRegion {
        width: 4,
        height: 4,
        ..TextureRegion::default()
    };
    device.texture_read(texture, region, &mut texels).expect("read");
    assert_eq!(texels[5..7], [1, 2]);
    assert_eq!(texels[9..11], [3, 4]);
    assert_eq!(texels.iter().filter(|t| **t != 0).count(), 4);

    let outside = TextureRegion {
        x: 3,
        width: 2,
        height: 1,
        ..TextureRegion::default()
    };
    assert!(matches!(
        device.texture_read(texture, outside, &mut texels),
        Err(RenderError::InvalidDesc(_))
    ));
}

#[test]
fn failed_programs_are_flagged_not_fatal() {
    let device = Device::new(TraceBackend::new().failing_programs(), Settings::default());
    let program = device
        .program_new(ProgramDesc {
            vertex: "void main() {}".into(),
            pixel: "void main() {}".into(),
            geometry: None,
        })
        .expect("program handle");
    assert!(device.is_failed(program));
    assert!(matches!(
        device.program_check(ShaderStage::Vertex, "void main() {}"),
        Err(RenderError::ShaderCheck(_))
    ));
    device.program_free(program).expect("free");
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn resize_is_seen_by_swapchain_passes() {
    let device = device(Settings::deferred());
    let swapchain = device.swapchain_new(640, 480);
    let pass = device.pass_swapchain_new(swapchain).expect("pass");
    device.swapchain_resize(swapchain, 800, 600).expect("resize");
    let size = device.pass_size(pass).expect("size");
    assert_eq!((size.width, size.height), (640, 480));

    device.swapchain_present(swapchain).expect("present");
    let size = device.pass_size(pass).expect("size");
    assert_eq!((size.width, size.height), (800, 600));
    assert_eq!(device.with_backend(|b| b.presents()), 1);
    assert_eq!(device.queued_commands(), 0);
    assert_eq!(
        device.with_backend(|b| b.count(CommandKind::SwapchainResize)),
        1
    );
}

#[test]
fn threads_record_their_own_passes() {
    let device = device(Settings::deferred());
    let passes: Vec<Pass> = (0..4).map(|_| swapchain_pass(&device)).collect();

    std::thread::scope(|scope| {
        for (t, pass) in passes.iter().enumerate() {
            let device = &device;
            scope.spawn(move || {
                device.pass_begin(*pass).expect("begin");
                for i in 0..8 {
                    device.pass_marker(*pass, (t * 100 + i) as u64).expect("marker");
                }
                device.pass_end(*pass).expect("end");
            });
        }
    });
    device.flush();

    let markers = device.with_backend(|b| b.markers());
    assert_eq!(markers.len(), 32);
    for run in markers.chunks(8) {
        let base = run[0];
        assert_eq!(base % 100, 0);
        assert!(run.iter().zip(base..).all(|(m, expected)| *m == expected));
    }
}
